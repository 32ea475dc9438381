//! Progress reporting and cooperative cancellation
//!
//! A [`ProgressSink`] is implemented by the UI layer. Returning `false` from
//! [`ProgressSink::on_progress`] requests cancellation. The pipeline wraps the
//! sink together with a [`CancellationToken`] in a [`Monitor`], which is the
//! only thing transfer components ever poll.

use crate::error::{AcquireError, Result};
use crate::pipeline::Stage;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Receiver of progress updates during download, extraction and clone
pub trait ProgressSink: Send + Sync {
    /// Report `current` units out of `total` (`None` when unknown).
    ///
    /// Return `false` to request cancellation.
    fn on_progress(&self, current: u64, total: Option<u64>) -> bool;

    /// Called on every pipeline state transition
    fn on_stage(&self, _stage: Stage) {}
}

impl<F> ProgressSink for F
where
    F: Fn(u64, Option<u64>) -> bool + Send + Sync,
{
    fn on_progress(&self, current: u64, total: Option<u64>) -> bool {
        self(current, total)
    }
}

/// Sink that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ProgressSink for Silent {
    fn on_progress(&self, _current: u64, _total: Option<u64>) -> bool {
        true
    }
}

/// Outcome of a completed transfer
///
/// A transfer that did not complete is reported as an `Err` instead, so a
/// `TransferResult` always describes a usable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    /// Bytes downloaded, or files extracted/checked out
    pub units: u64,
}

impl TransferResult {
    pub fn new(units: u64) -> Self {
        Self { units }
    }
}

/// Progress gate shared by all stages of one pipeline run
///
/// Once the sink declines or the token fires the monitor latches, and the
/// sink is never called again for this run.
pub struct Monitor<'a> {
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    stopped: AtomicBool,
}

impl<'a> Monitor<'a> {
    pub fn new(sink: &'a dyn ProgressSink, cancel: &'a CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            stopped: AtomicBool::new(false),
        }
    }

    /// Forward a progress update; returns `false` once cancellation was requested
    pub fn tick(&self, current: u64, total: Option<u64>) -> bool {
        if self.should_stop() {
            return false;
        }
        if !self.sink.on_progress(current, total) {
            self.stopped.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Whether cancellation was requested, without calling the sink
    pub fn should_stop(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return true;
        }
        if self.cancel.is_cancelled() {
            self.stopped.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn checkpoint(&self, what: &str) -> Result<()> {
        if self.should_stop() {
            return Err(AcquireError::Cancelled(format!("{} cancelled", what)));
        }
        Ok(())
    }

    pub(crate) fn stage(&self, stage: Stage) {
        self.sink.on_stage(stage);
    }
}
