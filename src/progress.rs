//! Progress reporting for the processing step.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] into
//! [`crate::processing::ProcessingStep`] to observe a run: status transitions
//! (`Idle → Processing → Done | Error`) and a 0–100 progress value that the
//! OCR collaborator drives while it works.
//!
//! Hosts that prefer a stream over callbacks can use [`WatchProgress`], which
//! publishes every event into a `tokio::sync::watch` channel.
//!
//! # Example
//!
//! ```rust
//! use docdesk::ProcessingProgressCallback;
//! use std::sync::atomic::{AtomicU8, Ordering};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl ProcessingProgressCallback for LastPercent {
//!     fn on_progress(&self, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let cb = LastPercent(AtomicU8::new(0));
//! cb.on_progress(40);
//! assert_eq!(cb.0.load(Ordering::SeqCst), 40);
//! ```

use crate::tools::ToolId;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Where a processing run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Processing,
    Done,
    Error,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Done | ProcessingStatus::Error)
    }
}

/// Called by the processing step as a run advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; OCR engines
/// report progress from whatever task drives the provider.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once the staged set has been loaded, before the collaborator runs.
    fn on_processing_start(&self, tool: ToolId, file_count: usize) {
        let _ = (tool, file_count);
    }

    fn on_status(&self, status: ProcessingStatus) {
        let _ = status;
    }

    /// Collaborator progress, `0..=100`.
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    fn on_processing_complete(&self, tool: ToolId) {
        let _ = tool;
    }

    /// Called with the user-facing failure message when the collaborator fails.
    fn on_processing_error(&self, tool: ToolId, error: &str) {
        let _ = (tool, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by [`crate::processing::ProcessingStep`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;

/// Point-in-time view of a run, as published by [`WatchProgress`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub tool: Option<ToolId>,
    pub status: ProcessingStatus,
    pub percent: u8,
    pub error: Option<String>,
}

/// Callback that publishes into a watch channel.
pub struct WatchProgress {
    tx: watch::Sender<ProgressSnapshot>,
}

impl WatchProgress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn stream(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::new(self.subscribe())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for WatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingProgressCallback for WatchProgress {
    fn on_processing_start(&self, tool: ToolId, _file_count: usize) {
        self.tx.send_modify(|s| {
            *s = ProgressSnapshot {
                tool: Some(tool),
                ..ProgressSnapshot::default()
            }
        });
    }

    fn on_status(&self, status: ProcessingStatus) {
        self.tx.send_modify(|s| s.status = status);
    }

    fn on_progress(&self, percent: u8) {
        self.tx.send_modify(|s| s.percent = percent.min(100));
    }

    fn on_processing_complete(&self, _tool: ToolId) {
        self.tx.send_modify(|s| s.percent = 100);
    }

    fn on_processing_error(&self, _tool: ToolId, error: &str) {
        self.tx.send_modify(|s| s.error = Some(error.to_string()));
    }
}
