//! Import failure reporting.
//!
//! Failures inside the byte pipeline do not propagate as `Err` out of
//! `produce()`; a producer reports through [`ImportFeedback`] and then
//! terminates its sequence. This keeps the pull loop uniform and gives the
//! host tool one place to log or aggregate diagnostics. A failed import
//! yields a partial or empty result plus recorded errors, never a crash.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// The things that can go wrong while pulling bytes through the pipeline.
///
/// Sniff mismatches are not errors; an extractor that does not recognize a
/// stream simply does not match and the stream falls through as text.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read trace source: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    #[error("compressed stream ended before the deflate stream did")]
    TruncatedStream,

    #[error("compressed stream requires a preset dictionary, which is not supported")]
    NeedsDictionary,
}

/// Clonable handle all pipeline stages report failures through.
///
/// The pipeline is single-threaded by contract, so this is `Rc`-shared;
/// batch tools construct one feedback per worker, never sharing across
/// threads.
#[derive(Clone, Default)]
pub struct ImportFeedback {
    errors: Rc<RefCell<Vec<ImportError>>>,
}

impl ImportFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Logs it and keeps it for the host to inspect.
    pub fn report(&self, err: ImportError) {
        log::error!("trace import error: {err}");
        self.errors.borrow_mut().push(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.borrow().is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.borrow().len()
    }

    /// Drain the recorded errors, leaving the feedback empty.
    pub fn take_errors(&self) -> Vec<ImportError> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }
}
