//! Tracestream library - streaming import core for Android system traces.
//!
//! Trace captures come off a device in several shapes: plain ftrace text,
//! systrace HTML reports with embedded trace-data segments, and
//! zlib-compressed payloads behind a `TRACE:` marker, sometimes nested.
//! This crate pulls any of those apart incrementally - no stage ever
//! materializes the whole capture in memory - and provides the slice
//! hierarchy builders the line-oriented importers feed as they parse.
//!
//! # Modules
//!
//! - [`slice`] / [`producer`] - the chunked byte-buffer abstraction and
//!   the pull-based producer protocol every pipeline stage speaks
//! - [`reader`] - sliding-window reader with bounded look-back for
//!   marker scanning across chunk boundaries
//! - [`extract`] - container sniffing and recursive unwrapping (systrace
//!   HTML, zlib-compressed ftrace)
//! - [`slices`] / [`model`] - nested slice and async-slice builders and
//!   the per-process/per-thread model they populate
//! - [`error`] - the feedback funnel all pipeline failures report through
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tracestream::{ExtractorRegistry, FileProducer, ImportFeedback, StreamingReader};
//!
//! let feedback = ImportFeedback::new();
//! let source = FileProducer::open(Path::new("capture.html"), feedback.clone())
//!     .expect("Failed to open capture");
//! let registry = ExtractorRegistry::with_defaults();
//! registry
//!     .unwrap_all(Box::new(source), &feedback, &mut |reader: &mut StreamingReader| {
//!         for line in reader.iter_lines(0) {
//!             println!("{line}");
//!         }
//!         Ok(())
//!     })
//!     .expect("Failed to unpack capture");
//! ```

pub mod error;
pub mod extract;
pub mod model;
pub mod producer;
pub mod reader;
pub mod slice;
pub mod slices;

// Re-export for convenience
pub use error::{ImportError, ImportFeedback};
pub use extract::{Extractor, ExtractorRegistry, HtmlExtractor, ZlibExtractor};
pub use model::{Model, ModelBuilder};
pub use producer::{BufferProducer, FileProducer, MemoryProducer};
pub use reader::StreamingReader;
pub use slice::DataSlice;
pub use slices::{AsyncSlice, AsyncSlicesBuilder, Slice, SliceGroup, SliceGroupBuilder};
