//! Transformation collaborators.
//!
//! The processing step hands staged files to one of two collaborators,
//! chosen by the tool table:
//!
//! * [`OcrEngine`] recognises text in one staged image.
//! * [`PdfEngine`] turns raw staged bytes plus typed parameters into PDF
//!   documents.
//!
//! Default implementations: [`vlm::VlmOcrEngine`] (vision LLM through
//! `edgequake-llm`) and [`pdfium::PdfiumEngine`] (pdfium through
//! `pdfium-render`).

pub mod pdfium;
pub mod vlm;

use crate::error::DocDeskError;
use crate::options::ToolParams;
use crate::progress::ProcessingProgressCallback;
use crate::stage::record::StagedFile;
use crate::tools::ToolId;
use async_trait::async_trait;

/// Text recognised in one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrOutput {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    /// Provider calls that failed before the one that succeeded.
    pub retries: u32,
}

/// A staged file decoded back to raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInput {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One PDF transformation.
#[derive(Debug, Clone)]
pub struct PdfRequest {
    pub tool: ToolId,
    pub params: ToolParams,
    pub inputs: Vec<PdfInput>,
}

/// A downloadable result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDocument {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl OutputDocument {
    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: "application/pdf".into(),
            bytes,
        }
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Recognise the text of `image`, reporting 0–100 progress.
    async fn recognize(
        &self,
        image: &StagedFile,
        language: &str,
        progress: &dyn ProcessingProgressCallback,
    ) -> Result<OcrOutput, DocDeskError>;
}

#[async_trait]
pub trait PdfEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `tool` can succeed on this engine at all.
    fn supports(&self, _tool: ToolId) -> bool {
        true
    }

    async fn transform(&self, request: PdfRequest) -> Result<Vec<OutputDocument>, DocDeskError>;
}

/// `report.pdf` + `merged` → `report-merged.pdf`; with a part number,
/// `report-part-2.pdf`.
pub fn output_name(input_name: &str, suffix: &str, part: Option<usize>, ext: &str) -> String {
    let stem = match input_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => input_name,
    };
    match part {
        Some(n) => format!("{stem}-{suffix}-{n}.{ext}"),
        None => format!("{stem}-{suffix}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names() {
        assert_eq!(output_name("report.pdf", "merged", None, "pdf"), "report-merged.pdf");
        assert_eq!(output_name("report.pdf", "part", Some(2), "pdf"), "report-part-2.pdf");
        assert_eq!(output_name("scan.final.png", "text", None, "txt"), "scan.final-text.txt");
        assert_eq!(output_name(".hidden", "x", None, "pdf"), ".hidden-x.pdf");
    }
}
