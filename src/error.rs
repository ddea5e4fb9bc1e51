//! Error types for the docdesk library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DocDeskError`]: **Fatal / user-visible**: the step cannot proceed
//!   (unreadable input, unsupported file type, a collaborator failed).
//!   Returned as `Err(DocDeskError)` from the upload and processing APIs and
//!   rendered to the user through [`DocDeskError::user_message`].
//!
//! * [`StorageError`]: **Recovered**: the size-limited facility refused a
//!   write. The staged file store catches it and falls back to in-process
//!   memory, so callers of `save` never see it.
//!
//! * [`CompressionError`]: **Recovered**: an image could not be decoded or
//!   re-encoded during the compression pass. Logged and followed by the same
//!   in-process fallback.

use crate::tools::ToolId;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docdesk library.
#[derive(Debug, Error)]
pub enum DocDeskError {
    // ── Selection errors ──────────────────────────────────────────────────
    /// `save` was called with no files.
    #[error("No files selected")]
    EmptySelection,

    /// The file extension is not accepted by the selected tool.
    #[error("Unsupported file type '{name}'. Allowed: {allowed}")]
    UnsupportedFileType { name: String, allowed: String },

    /// The file exceeds the per-file upload ceiling.
    #[error("File '{name}' is {size} bytes; the maximum is {max} bytes")]
    FileTooLarge { name: String, size: u64, max: u64 },

    /// The tool needs more files than were selected.
    #[error("{tool} needs at least {min} file(s), got {got}")]
    TooFewFiles { tool: ToolId, min: usize, got: usize },

    /// The tool accepts fewer files than were selected.
    #[error("{tool} accepts at most {max} file(s), got {got}")]
    TooManyFiles { tool: ToolId, max: usize, got: usize },

    /// A tool option the processing step depends on was not supplied.
    #[error("{tool} requires the '{key}' option")]
    MissingOption { tool: ToolId, key: String },

    /// A tool option was supplied but could not be parsed.
    #[error("Invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    /// No tool is registered under this identifier.
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    // ── Input-read errors ─────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The source bytes could not be read.
    #[error("Failed to read '{name}': {reason}")]
    InputRead { name: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Payload errors ────────────────────────────────────────────────────
    /// A staged payload is not a valid base64 data URL.
    #[error("Invalid staged payload: {0}")]
    InvalidPayload(String),

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The OCR or PDF collaborator failed.
    #[error("{tool} failed: {detail}")]
    TransformationFailed { tool: ToolId, detail: String },

    /// The configured engine cannot perform this tool's operation.
    #[error("{tool} is not supported by the {engine} engine")]
    UnsupportedOperation { tool: ToolId, engine: String },

    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium-directory or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An output name with no usable file name component, e.g. `..`.
    #[error("Invalid output file name '{0}'")]
    InvalidOutputName(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocDeskError {
    /// True for failures to read the user's source bytes.
    ///
    /// These are the only errors `save` can return besides an empty selection.
    pub fn is_input_read(&self) -> bool {
        matches!(
            self,
            DocDeskError::FileNotFound { .. }
                | DocDeskError::PermissionDenied { .. }
                | DocDeskError::InputRead { .. }
                | DocDeskError::DownloadFailed { .. }
                | DocDeskError::DownloadTimeout { .. }
        )
    }

    /// True when re-submitting the same selection may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_input_read() || matches!(self, DocDeskError::Internal(_))
    }

    /// Short inline message for the upload or processing step.
    pub fn user_message(&self) -> String {
        match self {
            e if e.is_input_read() => "Failed to process file. Please try again.".to_string(),
            DocDeskError::UnsupportedFileType { allowed, .. } => {
                format!("Unsupported file type. Allowed: {allowed}")
            }
            DocDeskError::FileTooLarge { max, .. } => {
                format!("File is too large. Max file size: {}MB", max / (1024 * 1024))
            }
            DocDeskError::TransformationFailed { tool, .. } => tool.failure_message().to_string(),
            other => other.to_string(),
        }
    }
}

/// A write the size-limited facility refused.
///
/// Never escapes the staged file store: every variant is recovered by the
/// in-process fallback.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write would push the facility past its capacity.
    #[error("Quota exceeded writing '{key}': needs {requested} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        requested: usize,
        available: usize,
    },

    /// The backing medium failed (directory-backed storage only).
    #[error("Storage I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure inside the image compression pass.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The image could not be decoded or re-encoded.
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// The blocking compression task panicked or was cancelled.
    #[error("Compression task failed: {0}")]
    Task(String),
}
