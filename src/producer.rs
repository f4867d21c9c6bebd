//! Pull-based byte chunk producers.
//!
//! Everything that moves bytes through the import pipeline implements
//! [`BufferProducer`]: file reading, container unwrapping, and streaming
//! decompression. A producer hands out chunks in exact stream order with
//! no gaps or duplication; `None` signals end of stream.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::error::ImportFeedback;
use crate::slice::DataSlice;

/// How much a [`FileProducer`] reads per pull.
pub const FILE_CHUNK_SIZE: usize = 1024 * 1024;

pub trait BufferProducer {
    /// Pull the next chunk, or `None` once the stream is exhausted.
    ///
    /// Failures are reported through the producer's feedback channel and
    /// then terminate the sequence; `produce` itself never fails.
    fn produce(&mut self) -> Option<DataSlice>;

    /// Release underlying resources. Idempotent; callers invoke it on
    /// every exit path, including early abort.
    fn close(&mut self);
}

// Borrowed producers flow through the same seams as owned ones. This is
// what lets an extractor hand a sub-stream rooted in its own reader to the
// recursive unwrap driver.
impl<P: BufferProducer + ?Sized> BufferProducer for &mut P {
    fn produce(&mut self) -> Option<DataSlice> {
        (**self).produce()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Chunked reader over a file on disk.
pub struct FileProducer {
    file: Option<File>,
    chunk_size: usize,
    feedback: ImportFeedback,
}

impl FileProducer {
    pub fn open(path: &Path, feedback: ImportFeedback) -> std::io::Result<Self> {
        Ok(FileProducer {
            file: Some(File::open(path)?),
            chunk_size: FILE_CHUNK_SIZE,
            feedback,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0);
        self.chunk_size = chunk_size;
        self
    }
}

impl BufferProducer for FileProducer {
    fn produce(&mut self) -> Option<DataSlice> {
        let file = self.file.as_mut()?;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    self.close();
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(DataSlice::from(buf));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.feedback.report(err.into());
                    self.close();
                    return None;
                }
            }
        }
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// In-memory producer with a configurable chunk size.
///
/// Production code uses it for payloads already in memory; tests use it to
/// exercise arbitrary chunk boundaries, down to one byte per chunk.
pub struct MemoryProducer {
    chunks: VecDeque<DataSlice>,
}

impl MemoryProducer {
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        assert!(chunk_size > 0);
        let chunks = data
            .chunks(chunk_size)
            .map(|c| DataSlice::from(c.to_vec()))
            .collect();
        MemoryProducer { chunks }
    }

    pub fn from_chunks(chunks: Vec<DataSlice>) -> Self {
        MemoryProducer {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
        }
    }
}

impl BufferProducer for MemoryProducer {
    fn produce(&mut self) -> Option<DataSlice> {
        self.chunks.pop_front()
    }

    fn close(&mut self) {
        self.chunks.clear();
    }
}
