//! Slice hierarchy builders.
//!
//! Trace importers emit flat begin/end events as they parse lines; these
//! builders turn them into properly nested interval trees. Thread-local
//! slices nest by stack position; async slices pair by `(name, cookie)`
//! because their begin and end can land on different threads.
//!
//! Real captures are frequently truncated or racy at their boundaries, so
//! structural anomalies (an end with no begin, an orphan async close) are
//! tolerated silently rather than treated as errors; the builders favor
//! best-effort reconstruction over strict validation.

use std::collections::HashMap;

/// Sentinel thread id recorded when a slice was force-closed at trace end
/// rather than by an observed end event.
pub const INVALID_PID: i32 = -1;

/// A named time interval on one thread. Children are strictly contained
/// in the parent's time range; siblings never partially overlap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slice {
    pub start_time: f64,
    pub end_time: f64,
    pub name: String,
    pub did_not_finish: bool,
    pub children: Vec<Slice>,
}

impl Slice {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// The root slices of one thread, in chronological begin order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SliceGroup {
    pub slices: Vec<Slice>,
}

struct OpenSlice {
    start_time: f64,
    name: String,
    children: Vec<Slice>,
}

/// Per-thread nesting builder with an explicit open-slice stack.
#[derive(Default)]
pub struct SliceGroupBuilder {
    slices: Vec<Slice>,
    open: Vec<OpenSlice>,
}

impl SliceGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_open_slices(&self) -> bool {
        !self.open.is_empty()
    }

    /// Push a new open slice onto this thread's stack.
    pub fn begin_slice(&mut self, start_time: f64, name: &str) {
        self.open.push(OpenSlice {
            start_time,
            name: name.to_string(),
            children: Vec::new(),
        });
    }

    /// Pop and close the top of the stack, attaching it as a child of the
    /// new top or as a root. An end with no matching begin is dropped;
    /// truncated captures produce those routinely.
    pub fn end_slice(&mut self, end_time: f64) -> Option<&Slice> {
        self.close_top(end_time, false)
    }

    /// Force-close every still-open slice at end of trace, marking each
    /// `did_not_finish` with `max_timestamp` as the synthetic end time.
    pub fn autoclose(&mut self, max_timestamp: f64) {
        while !self.open.is_empty() {
            self.close_top(max_timestamp, true);
        }
    }

    /// Finish building and hand over the slice group.
    pub fn build(self) -> SliceGroup {
        SliceGroup {
            slices: self.slices,
        }
    }

    fn close_top(&mut self, end_time: f64, did_not_finish: bool) -> Option<&Slice> {
        let open = self.open.pop()?;
        let closed = Slice {
            start_time: open.start_time,
            end_time,
            name: open.name,
            did_not_finish,
            children: open.children,
        };
        let siblings = match self.open.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.slices,
        };
        siblings.push(closed);
        siblings.last()
    }
}

/// A slice correlated by `(name, cookie)` instead of stack position.
#[derive(Clone, Debug, PartialEq)]
pub struct AsyncSlice {
    pub start_time: f64,
    pub end_time: f64,
    pub name: String,
    pub cookie: i64,
    pub start_pid: i32,
    pub end_pid: i32,
    pub did_not_finish: bool,
}

/// Pairs async begin/end events by key and collects completed slices.
#[derive(Default)]
pub struct AsyncSlicesBuilder {
    open: HashMap<(String, i64), AsyncSlice>,
    completed: Vec<AsyncSlice>,
}

impl AsyncSlicesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slices(&self) -> &[AsyncSlice] {
        &self.completed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Record an async begin. A second open for the same key replaces the
    /// previous entry, which is then never emitted at all; that matches
    /// the historical importer behavior even though it loses data.
    pub fn open_async_slice(&mut self, pid: i32, name: &str, cookie: i64, start_time: f64) {
        self.open.insert(
            (name.to_string(), cookie),
            AsyncSlice {
                start_time,
                end_time: 0.0,
                name: name.to_string(),
                cookie,
                start_pid: pid,
                end_pid: INVALID_PID,
                did_not_finish: true,
            },
        );
    }

    /// Record an async end. A close with no matching open is a no-op.
    pub fn close_async_slice(&mut self, pid: i32, name: &str, cookie: i64, end_time: f64) {
        if let Some(mut slice) = self.open.remove(&(name.to_string(), cookie)) {
            slice.end_time = end_time;
            slice.end_pid = pid;
            slice.did_not_finish = false;
            self.completed.push(slice);
        }
    }

    /// Force-close everything still pending at end of trace. Idempotent;
    /// a second call finds the pending map empty. Drained entries are
    /// ordered by start time to keep output deterministic.
    pub fn auto_close_open_slices(&mut self, max_timestamp: f64) {
        let mut pending: Vec<AsyncSlice> = self
            .open
            .drain()
            .map(|(_, mut slice)| {
                slice.end_time = max_timestamp;
                slice.did_not_finish = true;
                slice
            })
            .collect();
        pending.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        self.completed.extend(pending);
    }

    pub fn build(self) -> Vec<AsyncSlice> {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_nested(parent: &Slice) {
        assert!(parent.duration() >= 0.0);
        let mut last_begin = parent.start_time;
        for child in &parent.children {
            assert!(child.duration() <= parent.duration());
            assert!(child.start_time >= parent.start_time);
            assert!(child.end_time <= parent.end_time);
            // Depth-first child order matches chronological begin order.
            assert!(child.start_time >= last_begin);
            last_begin = child.start_time;
            assert_nested(child);
        }
    }

    #[test]
    fn test_well_formed_nesting() {
        let mut builder = SliceGroupBuilder::new();
        builder.begin_slice(1.0, "root");
        builder.begin_slice(2.0, "childA");
        builder.begin_slice(3.0, "grandchild");
        builder.end_slice(4.0);
        builder.end_slice(5.0);
        builder.begin_slice(6.0, "childB");
        builder.end_slice(7.0);
        builder.end_slice(8.0);
        builder.begin_slice(9.0, "root2");
        builder.end_slice(10.0);

        let group = builder.build();
        assert_eq!(group.slices.len(), 2);

        let root = &group.slices[0];
        assert_eq!(root.name, "root");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].name, "childA");
        assert_eq!(root.children[0].children[0].name, "grandchild");
        assert_eq!(root.children[1].name, "childB");

        // Root ranges disjoint.
        assert!(group.slices[0].end_time <= group.slices[1].start_time);
        for root in &group.slices {
            assert!(!root.did_not_finish);
            assert_nested(root);
        }
    }

    #[test]
    fn test_end_with_no_begin_is_dropped() {
        let mut builder = SliceGroupBuilder::new();
        assert!(builder.end_slice(1.0).is_none());
        builder.begin_slice(2.0, "a");
        builder.end_slice(3.0);
        // The stray end changed nothing.
        let group = builder.build();
        assert_eq!(group.slices.len(), 1);
        assert_eq!(group.slices[0].name, "a");
    }

    #[test]
    fn test_unterminated_slice_autoclose() {
        let mut builder = SliceGroupBuilder::new();
        builder.begin_slice(5.0, "never-ends");
        assert!(builder.has_open_slices());
        builder.autoclose(42.0);
        assert!(!builder.has_open_slices());

        let group = builder.build();
        assert_eq!(group.slices.len(), 1);
        assert_eq!(group.slices[0].end_time, 42.0);
        assert_eq!(group.slices[0].duration(), 37.0);
        assert!(group.slices[0].did_not_finish);
    }

    #[test]
    fn test_autoclose_preserves_nesting() {
        let mut builder = SliceGroupBuilder::new();
        builder.begin_slice(1.0, "outer");
        builder.begin_slice(2.0, "inner");
        builder.autoclose(9.0);

        let group = builder.build();
        assert_eq!(group.slices.len(), 1);
        let outer = &group.slices[0];
        assert_eq!(outer.name, "outer");
        assert!(outer.did_not_finish);
        assert_eq!(outer.children.len(), 1);
        assert_eq!(outer.children[0].name, "inner");
        assert!(outer.children[0].did_not_finish);
        assert_nested(outer);
    }

    #[test]
    fn test_async_pairing() {
        let mut builder = AsyncSlicesBuilder::new();
        builder.open_async_slice(100, "x", 7, 1.5);
        builder.close_async_slice(200, "x", 7, 2.5);

        let slices = builder.build();
        assert_eq!(slices.len(), 1);
        let slice = &slices[0];
        assert_eq!(slice.start_time, 1.5);
        assert_eq!(slice.end_time, 2.5);
        assert_eq!(slice.start_pid, 100);
        assert_eq!(slice.end_pid, 200);
        assert!(!slice.did_not_finish);
    }

    #[test]
    fn test_async_orphan_close_is_noop() {
        let mut builder = AsyncSlicesBuilder::new();
        builder.close_async_slice(100, "x", 7, 2.5);
        assert!(builder.slices().is_empty());

        // Same name, different cookie: still no match.
        builder.open_async_slice(100, "x", 7, 1.0);
        builder.close_async_slice(100, "x", 8, 2.0);
        assert!(builder.slices().is_empty());
        assert_eq!(builder.open_count(), 1);
    }

    #[test]
    fn test_async_auto_close() {
        let mut builder = AsyncSlicesBuilder::new();
        builder.open_async_slice(100, "a", 1, 3.0);
        builder.open_async_slice(100, "b", 2, 1.0);
        builder.auto_close_open_slices(9.0);

        let mut slices = builder.slices().to_vec();
        assert_eq!(slices.len(), 2);
        // Ordered by start time.
        assert_eq!(slices[0].name, "b");
        assert_eq!(slices[1].name, "a");
        for slice in slices.drain(..) {
            assert_eq!(slice.end_time, 9.0);
            assert_eq!(slice.end_pid, INVALID_PID);
            assert!(slice.did_not_finish);
        }
    }

    #[test]
    fn test_async_auto_close_idempotent() {
        let mut builder = AsyncSlicesBuilder::new();
        builder.open_async_slice(100, "a", 1, 1.0);
        builder.auto_close_open_slices(5.0);
        builder.auto_close_open_slices(6.0);
        assert_eq!(builder.slices().len(), 1);
        assert_eq!(builder.slices()[0].end_time, 5.0);
    }

    #[test]
    fn test_async_duplicate_open_orphans_previous() {
        let mut builder = AsyncSlicesBuilder::new();
        builder.open_async_slice(100, "x", 7, 1.0);
        // Historical behavior: the first open is silently replaced and
        // never emitted, even by auto-close.
        builder.open_async_slice(100, "x", 7, 2.0);
        builder.close_async_slice(100, "x", 7, 3.0);
        builder.auto_close_open_slices(9.0);

        let slices = builder.build();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start_time, 2.0);
    }
}
