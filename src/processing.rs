//! The processing step: load the staged set, run the tool's collaborator,
//! clear the store.
//!
//! ```text
//! load() ── absent ──────────────▶ Redirect(/tool/<slug>)
//!    │
//!    └── StagedSet ─▶ OcrEngine | PdfEngine ─▶ clear() ─▶ Completed | Failed
//! ```
//!
//! `clear()` runs whatever the collaborator returns, so a failed run never
//! leaves stale bytes behind.

use crate::engines::{output_name, OcrEngine, OutputDocument, PdfEngine, PdfInput, PdfRequest};
use crate::error::DocDeskError;
use crate::history::ActivityLog;
use crate::options::{ToolParams, DEFAULT_LANGUAGE};
use crate::progress::{NoopProgressCallback, ProcessingStatus, ProgressCallback};
use crate::stage::record::StagedSet;
use crate::stage::StagedFileStore;
use crate::tools::{Collaborator, ToolId};
use crate::upload::Route;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// Recognised text, with the name of the image it came from.
    Text { source_name: String, text: String },
    /// Downloadable documents.
    Documents(Vec<OutputDocument>),
}

impl ToolOutput {
    /// The output as downloadable documents. Text becomes a `.txt` file.
    pub fn documents(&self) -> Vec<OutputDocument> {
        match self {
            ToolOutput::Text { source_name, text } => vec![OutputDocument {
                name: output_name(source_name, ToolId::Ocr.spec().output_suffix, None, "txt"),
                mime_type: "text/plain".into(),
                bytes: text.as_bytes().to_vec(),
            }],
            ToolOutput::Documents(docs) => docs.clone(),
        }
    }

    /// Write every document into `dir`, returning the paths written.
    ///
    /// Uses atomic writes (temp file + rename) so a crash never leaves a
    /// partial download behind.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, DocDeskError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DocDeskError::OutputWriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;

        let mut written = Vec::new();
        for doc in self.documents() {
            // Names come from the caller; never let one climb out of `dir`.
            let file_name = Path::new(&doc.name)
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DocDeskError::InvalidOutputName(doc.name.clone()))?;
            let path = dir.join(file_name);
            let tmp_path = dir.join(format!(".{file_name}.tmp"));
            tokio::fs::write(&tmp_path, &doc.bytes)
                .await
                .map_err(|e| DocDeskError::OutputWriteFailed {
                    path: path.clone(),
                    source: e,
                })?;
            tokio::fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| DocDeskError::OutputWriteFailed {
                    path: path.clone(),
                    source: e,
                })?;
            debug!("Wrote {} ({} bytes)", path.display(), doc.bytes.len());
            written.push(path);
        }
        Ok(written)
    }
}

/// Terminal state of one processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Nothing usable was staged; go back to the upload step.
    Redirect(Route),
    Completed {
        tool: ToolId,
        /// Success headline for the tool.
        message: &'static str,
        output: ToolOutput,
    },
    Failed {
        tool: ToolId,
        /// User-facing failure message for the tool.
        message: &'static str,
        /// What actually went wrong.
        detail: String,
    },
}

impl ProcessingOutcome {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            ProcessingOutcome::Redirect(_) => ProcessingStatus::Idle,
            ProcessingOutcome::Completed { .. } => ProcessingStatus::Done,
            ProcessingOutcome::Failed { .. } => ProcessingStatus::Error,
        }
    }
}

/// Processing step for every tool in the table.
pub struct ProcessingStep {
    store: Arc<StagedFileStore>,
    ocr: Arc<dyn OcrEngine>,
    pdf: Arc<dyn PdfEngine>,
    progress: ProgressCallback,
    history: Option<Arc<ActivityLog>>,
}

impl ProcessingStep {
    pub fn new(
        store: Arc<StagedFileStore>,
        ocr: Arc<dyn OcrEngine>,
        pdf: Arc<dyn PdfEngine>,
    ) -> Self {
        Self {
            store,
            ocr,
            pdf,
            progress: Arc::new(NoopProgressCallback),
            history: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_history(mut self, history: Arc<ActivityLog>) -> Self {
        self.history = Some(history);
        self
    }

    /// Whether the collaborator behind `tool` can run it.
    pub fn supports(&self, tool: ToolId) -> bool {
        match tool.spec().collaborator {
            Collaborator::Ocr => true,
            Collaborator::Pdf => self.pdf.supports(tool),
        }
    }

    /// Run `tool` over whatever is staged.
    pub async fn run(&self, tool: ToolId) -> ProcessingOutcome {
        let Some(set) = self.store.load() else {
            info!("{}: nothing staged, redirecting to upload", tool);
            return ProcessingOutcome::Redirect(Route::Upload(tool));
        };
        if let Some(staged_for) = set.tool().filter(|&t| t != tool) {
            // Belongs to another tool's page; leave it for that page.
            info!("{}: staged set belongs to {}, redirecting", tool, staged_for);
            return ProcessingOutcome::Redirect(Route::Upload(tool));
        }

        self.progress.on_processing_start(tool, set.files.len());
        self.progress.on_status(ProcessingStatus::Processing);
        self.progress.on_progress(0);

        let result = self.dispatch(tool, &set).await;
        self.store.clear();

        match result {
            Ok(output) => {
                self.progress.on_progress(100);
                self.progress.on_status(ProcessingStatus::Done);
                self.progress.on_processing_complete(tool);
                self.record(tool, &set);
                ProcessingOutcome::Completed {
                    tool,
                    message: tool.success_message(),
                    output,
                }
            }
            Err(e) => {
                warn!("{} failed: {}", tool, e);
                let message = tool.failure_message();
                self.progress.on_processing_error(tool, message);
                self.progress.on_status(ProcessingStatus::Error);
                ProcessingOutcome::Failed {
                    tool,
                    message,
                    detail: e.to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, tool: ToolId, set: &StagedSet) -> Result<ToolOutput, DocDeskError> {
        let spec = tool.spec();
        spec.validate_names(set.files.iter().map(|f| f.name.as_str()))?;
        let params = ToolParams::from_options(tool, &set.options)?;

        match spec.collaborator {
            Collaborator::Ocr => {
                let image = set.primary().ok_or(DocDeskError::EmptySelection)?;
                let language = match &params {
                    ToolParams::Ocr { language } => language.as_str(),
                    _ => DEFAULT_LANGUAGE,
                };
                debug!("{}: {} via {}", tool, image.name, self.ocr.name());
                let out = self
                    .ocr
                    .recognize(image, language, self.progress.as_ref())
                    .await?;
                Ok(ToolOutput::Text {
                    source_name: image.name.clone(),
                    text: out.text,
                })
            }
            Collaborator::Pdf => {
                let inputs = set
                    .files
                    .iter()
                    .map(|f| {
                        Ok(PdfInput {
                            name: f.name.clone(),
                            mime_type: f.mime_type.clone(),
                            bytes: f.bytes()?,
                        })
                    })
                    .collect::<Result<Vec<_>, DocDeskError>>()?;
                debug!("{}: {} file(s) via {}", tool, inputs.len(), self.pdf.name());
                let docs = self
                    .pdf
                    .transform(PdfRequest {
                        tool,
                        params,
                        inputs,
                    })
                    .await?;
                Ok(ToolOutput::Documents(docs))
            }
        }
    }

    fn record(&self, tool: ToolId, set: &StagedSet) {
        let (Some(history), Some(file)) = (&self.history, set.primary()) else {
            return;
        };
        if let Err(e) = history.record_use(tool, &file.name) {
            warn!("Could not record activity: {}", e);
        }
    }
}
