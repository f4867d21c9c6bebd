//! Per-process/per-thread sink the builders populate.
//!
//! The line-oriented trace importers walk their event stream and push
//! begin/end events into the builders hanging off these containers; when
//! the stream ends they flush with the last observed timestamp and the
//! finished model is what analyzers and viewers consume.

use std::collections::HashMap;

use crate::slices::{AsyncSlice, AsyncSlicesBuilder, SliceGroup, SliceGroupBuilder};

#[derive(Default)]
pub struct ModelBuilder {
    processes: HashMap<i32, ProcessBuilder>,
}

pub struct ProcessBuilder {
    pub pid: i32,
    pub name: Option<String>,
    pub threads: HashMap<i32, ThreadBuilder>,
    pub async_slices: AsyncSlicesBuilder,
}

pub struct ThreadBuilder {
    pub tid: i32,
    pub name: Option<String>,
    pub slices: SliceGroupBuilder,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_mut(&mut self, pid: i32) -> &mut ProcessBuilder {
        self.processes.entry(pid).or_insert_with(|| ProcessBuilder {
            pid,
            name: None,
            threads: HashMap::new(),
            async_slices: AsyncSlicesBuilder::new(),
        })
    }

    /// Flush unterminated state with the trace's final timestamp and
    /// produce the finished model.
    pub fn finish(self, max_timestamp: f64) -> Model {
        let processes = self
            .processes
            .into_iter()
            .map(|(pid, mut process)| {
                process.async_slices.auto_close_open_slices(max_timestamp);
                let threads = process
                    .threads
                    .into_iter()
                    .map(|(tid, mut thread)| {
                        thread.slices.autoclose(max_timestamp);
                        (
                            tid,
                            Thread {
                                tid: thread.tid,
                                name: thread.name,
                                slices: thread.slices.build(),
                            },
                        )
                    })
                    .collect();
                (
                    pid,
                    Process {
                        pid: process.pid,
                        name: process.name,
                        threads,
                        async_slices: process.async_slices.build(),
                    },
                )
            })
            .collect();
        Model { processes }
    }
}

impl ProcessBuilder {
    pub fn thread_mut(&mut self, tid: i32) -> &mut ThreadBuilder {
        self.threads.entry(tid).or_insert_with(|| ThreadBuilder {
            tid,
            name: None,
            slices: SliceGroupBuilder::new(),
        })
    }
}

#[derive(Default)]
pub struct Model {
    pub processes: HashMap<i32, Process>,
}

pub struct Process {
    pub pid: i32,
    pub name: Option<String>,
    pub threads: HashMap<i32, Thread>,
    pub async_slices: Vec<AsyncSlice>,
}

pub struct Thread {
    pub tid: i32,
    pub name: Option<String>,
    pub slices: SliceGroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_flow_into_model() {
        let mut builder = ModelBuilder::new();
        {
            let process = builder.process_mut(1000);
            process.name = Some("system_server".to_string());
            process.async_slices.open_async_slice(1000, "anim", 3, 1.0);

            let thread = process.thread_mut(1001);
            thread.slices.begin_slice(1.0, "doFrame");
            thread.slices.end_slice(2.0);
            thread.slices.begin_slice(3.0, "unfinished");
        }

        let model = builder.finish(10.0);
        let process = &model.processes[&1000];
        assert_eq!(process.name.as_deref(), Some("system_server"));

        let thread = &process.threads[&1001];
        assert_eq!(thread.slices.slices.len(), 2);
        assert!(thread.slices.slices[1].did_not_finish);
        assert_eq!(thread.slices.slices[1].end_time, 10.0);

        assert_eq!(process.async_slices.len(), 1);
        assert!(process.async_slices[0].did_not_finish);
        assert_eq!(process.async_slices[0].end_time, 10.0);
    }
}
