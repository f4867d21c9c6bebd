//! Container detection and unwrapping.
//!
//! Trace captures arrive in several wrappings: plain ftrace text,
//! HTML-wrapped systrace, and zlib-compressed payloads behind a `TRACE:`
//! marker, possibly nested (an HTML capture whose script segment holds a
//! compressed payload). Extractors sniff a bounded prefix of a stream and,
//! when they match, produce the logical sub-streams inside it; the
//! registry recursively feeds every sub-stream back through the same list
//! until nothing matches, at which point the stream is final trace text.

pub mod deflate;
pub mod html;

use anyhow::Result;

use crate::error::ImportFeedback;
use crate::producer::BufferProducer;
use crate::reader::StreamingReader;

pub use deflate::ZlibExtractor;
pub use html::HtmlExtractor;

/// How many leading bytes a sniff gets to look at.
pub const SNIFF_WINDOW: usize = 200;

/// Callback invoked once per final (fully unwrapped) text stream.
pub type TextSink<'s> = dyn for<'x> FnMut(&mut StreamingReader<'x>) -> Result<()> + 's;

/// Callback invoked once per logical sub-stream an extractor discovers.
pub type SubStreamSink<'s> = dyn FnMut(&mut dyn BufferProducer) -> Result<()> + 's;

pub trait Extractor {
    fn name(&self) -> &'static str;

    /// Pure check over a bounded prefix of the stream. Must not consume
    /// or advance anything; callers peek through the reader.
    fn sniff(&self, peek: &[u8]) -> bool;

    /// Drive the reader and hand each embedded sub-stream to `sink`. A
    /// simple unwrap calls it exactly once; a multi-segment container
    /// calls it once per segment.
    ///
    /// Format failures go through `feedback`; the `Result` only carries
    /// errors surfaced by the sink itself.
    fn extract(
        &self,
        reader: &mut StreamingReader<'_>,
        feedback: &ImportFeedback,
        sink: &mut SubStreamSink<'_>,
    ) -> Result<()>;
}

/// Ordered list of candidate extractors; first sniff match wins. Built
/// explicitly and passed in rather than living in global state.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: HTML systrace, then compressed ftrace.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HtmlExtractor));
        registry.register(Box::new(ZlibExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    /// First registered extractor whose sniff accepts this prefix, if any.
    /// No match means the stream is already final text.
    pub fn extractor_for(&self, peek: &[u8]) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .map(|e| e.as_ref())
            .find(|e| e.sniff(peek))
    }

    /// Recursively unwrap `source` until nothing matches, invoking
    /// `on_text` with a reader over each final text stream.
    pub fn unwrap_all<'p>(
        &self,
        source: Box<dyn BufferProducer + 'p>,
        feedback: &ImportFeedback,
        on_text: &mut TextSink<'_>,
    ) -> Result<()> {
        let mut reader = StreamingReader::new(source);
        let peek = reader.peek(SNIFF_WINDOW);
        match self.extractor_for(&peek) {
            Some(extractor) => {
                log::debug!("unwrapping {} container", extractor.name());
                extractor.extract(&mut reader, feedback, &mut |sub: &mut dyn BufferProducer| {
                    self.unwrap_all(Box::new(sub), feedback, &mut *on_text)
                })
            }
            None => on_text(&mut reader),
        }
    }
}
