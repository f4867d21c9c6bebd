//! Sliding-window reader over a [`BufferProducer`].
//!
//! The reader retains a window of recently pulled chunks so callers can
//! scan for textual markers across chunk boundaries and re-read sniffed
//! bytes, while old chunks are dropped to bound memory on
//! multi-hundred-MB captures. Random access works anywhere inside the
//! retained window; everything before the low-water mark is only
//! reachable by having iterated over it already.

use std::collections::VecDeque;

use crate::producer::BufferProducer;
use crate::slice::DataSlice;

/// Window budget before the oldest chunks get evicted. Small against the
/// capture files this reader is for, large against the sniff window and
/// the marker scan steps, so detection never races eviction.
pub const DEFAULT_KEEP_LOADED: usize = 8 * 1024 * 1024;

struct WindowChunk {
    start: usize,
    data: DataSlice,
}

pub struct StreamingReader<'p> {
    source: Box<dyn BufferProducer + 'p>,
    chunks: VecDeque<WindowChunk>,
    window_start: usize,
    window_end: usize,
    keep_loaded: usize,
    exhausted: bool,
}

impl<'p> StreamingReader<'p> {
    pub fn new(source: Box<dyn BufferProducer + 'p>) -> Self {
        StreamingReader {
            source,
            chunks: VecDeque::new(),
            window_start: 0,
            window_end: 0,
            keep_loaded: DEFAULT_KEEP_LOADED,
            exhausted: false,
        }
    }

    pub fn from_producer(source: impl BufferProducer + 'p) -> Self {
        Self::new(Box::new(source))
    }

    pub fn with_keep_loaded(mut self, keep_loaded: usize) -> Self {
        assert!(keep_loaded > 0);
        self.keep_loaded = keep_loaded;
        self
    }

    /// Logical offset of the oldest retained byte.
    pub fn window_start(&self) -> usize {
        self.window_start
    }

    /// Logical offset one past the newest retained byte.
    pub fn loaded_end(&self) -> usize {
        self.window_end
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pull from the source until at least `target` bytes have been
    /// buffered or the source is exhausted. Returns whether the target
    /// was reached.
    pub fn load_to(&mut self, target: usize) -> bool {
        while self.window_end < target && !self.exhausted {
            match self.source.produce() {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => {
                    let start = self.window_end;
                    self.window_end += chunk.len();
                    self.chunks.push_back(WindowChunk { start, data: chunk });
                }
                None => {
                    self.exhausted = true;
                    self.source.close();
                }
            }
        }
        self.window_end >= target
    }

    /// Drop retained chunks that lie entirely below `offset`, but only
    /// once the window exceeds its byte budget. Offsets below the
    /// resulting window start are no longer randomly addressable.
    pub fn evict_below(&mut self, offset: usize) {
        while self.window_end - self.window_start > self.keep_loaded {
            match self.chunks.front() {
                Some(front) if front.start + front.data.len() <= offset => {
                    let chunk = self.chunks.pop_front().unwrap();
                    self.window_start = chunk.start + chunk.data.len();
                    log::debug!(
                        "evicted window chunk, low-water mark now {}",
                        self.window_start
                    );
                }
                _ => break,
            }
        }
    }

    /// Byte at logical offset `i`, if it is inside the retained window.
    pub fn byte_at(&self, i: usize) -> Option<u8> {
        if i < self.window_start || i >= self.window_end {
            return None;
        }
        let chunk = self.chunk_containing(i)?;
        Some(chunk.data.as_bytes()[i - chunk.start])
    }

    /// Copy `[start, end)` out of the window, clamping `end` to the
    /// loaded extent. `None` if `start` has been evicted or not loaded.
    pub fn copy_range(&self, start: usize, end: usize) -> Option<Vec<u8>> {
        let end = end.min(self.window_end);
        if start < self.window_start || start > end {
            return None;
        }
        let mut out = Vec::with_capacity(end - start);
        let mut pos = start;
        while pos < end {
            let chunk = self.chunk_containing(pos)?;
            let begin = pos - chunk.start;
            let len = (chunk.data.len() - begin).min(end - pos);
            out.extend_from_slice(&chunk.data.as_bytes()[begin..begin + len]);
            pos += len;
        }
        Some(out)
    }

    /// Non-consuming copy of up to `len` bytes from the start of the
    /// stream, for format sniffing. Loads but never advances or evicts.
    pub fn peek(&mut self, len: usize) -> Vec<u8> {
        self.load_to(len);
        self.copy_range(0, len).unwrap_or_default()
    }

    /// First occurrence of `needle` at or after `from`, scanning no
    /// further than `limit`. Handles needles spanning chunk boundaries.
    pub fn index_of(&mut self, needle: &[u8], from: usize, limit: usize) -> Option<usize> {
        if needle.is_empty() {
            return Some(from);
        }
        self.load_to(limit);
        let end = limit.min(self.window_end);
        if end < from + needle.len() {
            return None;
        }
        let hay = self.copy_range(from, end)?;
        hay.windows(needle.len())
            .position(|w| w == needle)
            .map(|i| from + i)
    }

    /// The retained chunk slice starting at `pos`, bounded by `end` when
    /// given. Loads on demand and drives eviction; this is the primitive
    /// the iterators and the extractor tail producers are built on.
    pub fn next_chunk(&mut self, pos: usize, end: Option<usize>) -> Option<DataSlice> {
        if let Some(e) = end {
            if pos >= e {
                return None;
            }
        }
        self.evict_below(pos);
        if !self.load_to(pos + 1) {
            return None;
        }
        let chunk = self.chunk_containing(pos)?;
        let begin = pos - chunk.start;
        let mut len = chunk.data.len() - begin;
        if let Some(e) = end {
            len = len.min(e - pos);
        }
        Some(chunk.data.slice(begin, len))
    }

    /// Lazy forward-only sequence of chunks covering `[from, end-of-stream)`.
    pub fn iter(&mut self, from: usize) -> ChunkIter<'_, 'p> {
        ChunkIter {
            reader: self,
            pos: from,
            end: None,
        }
    }

    /// Lazy sequence of text lines from `from`. CR is stripped and empty
    /// lines are skipped, matching what the line-oriented trace importers
    /// expect to consume.
    pub fn iter_lines(&mut self, from: usize) -> LineIter<'_, 'p> {
        LineIter {
            reader: self,
            pos: from,
            cur: None,
        }
    }

    /// Close the underlying source early.
    pub fn close(&mut self) {
        self.source.close();
        self.exhausted = true;
    }

    fn chunk_containing(&self, pos: usize) -> Option<&WindowChunk> {
        // Eviction keeps the window tight, so the wanted chunk is near
        // the front; a linear scan is fine here.
        self.chunks
            .iter()
            .find(|c| pos >= c.start && pos < c.start + c.data.len())
    }
}

pub struct ChunkIter<'r, 'p> {
    reader: &'r mut StreamingReader<'p>,
    pos: usize,
    end: Option<usize>,
}

impl Iterator for ChunkIter<'_, '_> {
    type Item = DataSlice;

    fn next(&mut self) -> Option<DataSlice> {
        let chunk = self.reader.next_chunk(self.pos, self.end)?;
        self.pos += chunk.len();
        Some(chunk)
    }
}

pub struct LineIter<'r, 'p> {
    reader: &'r mut StreamingReader<'p>,
    pos: usize,
    cur: Option<(DataSlice, usize)>,
}

impl LineIter<'_, '_> {
    fn next_byte(&mut self) -> Option<u8> {
        loop {
            if let Some((chunk, off)) = &mut self.cur {
                if *off < chunk.len() {
                    let b = chunk.as_bytes()[*off];
                    *off += 1;
                    self.pos += 1;
                    return Some(b);
                }
                self.cur = None;
            }
            let chunk = self.reader.next_chunk(self.pos, None)?;
            self.cur = Some((chunk, 0));
        }
    }
}

impl Iterator for LineIter<'_, '_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let byte = self.next_byte();
            match byte {
                Some(b'\n') | None => {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if !line.is_empty() {
                        return Some(String::from_utf8_lossy(&line).into_owned());
                    }
                    if byte.is_none() {
                        return None;
                    }
                    // Empty line, keep scanning.
                }
                Some(b) => line.push(b),
            }
        }
    }
}
