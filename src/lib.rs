//! # docdesk
//!
//! Document tools (merge, split, protect, compress, watermark and rotate
//! PDFs, convert images to PDF, extract text with OCR) built around a
//! quota-aware **staged file store**.
//!
//! ## Flow
//!
//! ```text
//! upload step
//!  │  validate selection against the tool table
//!  ├─ save(files, options)   ── storage ─┬─ fits ─────────────▶ payload key
//!  │                                     ├─ image, too big ───▶ JPEG pass ─▶ payload key
//!  │                                     └─ otherwise ────────▶ in-process holder
//!  ▼
//! processing step
//!  ├─ load()  ── absent ──▶ redirect to upload
//!  ├─ OcrEngine | PdfEngine
//!  └─ clear()  (always)
//! ```
//!
//! The storage facility is small (5 MiB by default) and synchronous, like a
//! browser's session storage. Payloads are base64 data URLs; anything over
//! the per-file budget is compressed (images) or held in process memory, so
//! `save` only fails when an input cannot be read at all.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docdesk::{
//!     SessionStorage, StageConfig, StageInput, StagedFileStore, StagingOptions, ToolId,
//!     UploadStep,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(StagedFileStore::new(
//!         Arc::new(SessionStorage::new()),
//!         StageConfig::default(),
//!     ));
//!     let upload = UploadStep::new(store.clone());
//!     let route = upload
//!         .submit(
//!             ToolId::PdfRotate,
//!             vec![StageInput::from_path("report.pdf")],
//!             StagingOptions::default().with("angle", "90"),
//!         )
//!         .await?;
//!     println!("next: {route}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docdesk` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docdesk = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engines;
pub mod error;
pub mod history;
pub mod input;
pub mod options;
pub mod processing;
pub mod progress;
pub mod prompts;
pub mod stage;
pub mod tools;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CompressionSettings, OcrConfig, OcrConfigBuilder, StageConfig, StageConfigBuilder};
pub use engines::pdfium::PdfiumEngine;
pub use engines::vlm::VlmOcrEngine;
pub use engines::{OcrEngine, OcrOutput, OutputDocument, PdfEngine, PdfInput, PdfRequest};
pub use error::{CompressionError, DocDeskError, StorageError};
pub use history::{ActivityLog, RecentFile};
pub use input::{FileSource, StageInput};
pub use options::{PageRange, Rotation, ToolParams};
pub use processing::{ProcessingOutcome, ProcessingStep, ToolOutput};
pub use progress::{
    NoopProgressCallback, ProcessingProgressCallback, ProcessingStatus, ProgressCallback,
    ProgressSnapshot, WatchProgress,
};
pub use stage::fallback::FallbackHolder;
pub use stage::record::{FileEntry, Placement, StageManifest, StagedFile, StagedSet, StagingOptions};
pub use stage::storage::{DirStorage, KeyValueStorage, SessionStorage};
pub use stage::{StageReceipt, StagedFileStore};
pub use tools::{search_tools, Collaborator, ToolId, ToolSpec, TOOLS};
pub use upload::{Route, UploadStep};
