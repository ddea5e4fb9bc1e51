//! The tool table: one declarative row per document tool.
//!
//! Upload validation, option checks, navigation and collaborator dispatch all
//! read from [`TOOLS`], so adding a tool means adding a row here and a match
//! arm in [`crate::options::ToolParams`]. The staged file store never changes.

use crate::error::DocDeskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a document tool. Serialised as its URL slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolId {
    Ocr,
    PdfMerge,
    PdfSplit,
    PdfProtect,
    PdfCompress,
    PdfWatermark,
    PdfRotate,
    ImageToPdf,
}

/// Which external collaborator performs the tool's transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    /// Text recognition over a single staged image.
    Ocr,
    /// PDF manipulation over raw staged bytes.
    Pdf,
}

/// Static description of a tool.
#[derive(Debug)]
pub struct ToolSpec {
    pub id: ToolId,
    /// URL segment, e.g. `pdf-merge`.
    pub slug: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Lower-case extensions including the dot.
    pub accepted_extensions: &'static [&'static str],
    pub min_files: usize,
    pub max_files: usize,
    /// Option keys the processing step cannot run without.
    pub required_options: &'static [&'static str],
    pub collaborator: Collaborator,
    /// File name suffix for produced documents.
    pub output_suffix: &'static str,
}

const PDF: &[&str] = &[".pdf"];
const IMAGES: &[&str] = &[".jpg", ".jpeg", ".png"];

/// Every tool, in dashboard order.
pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        id: ToolId::Ocr,
        slug: "ocr",
        title: "OCR",
        description: "Extract text from images",
        accepted_extensions: IMAGES,
        min_files: 1,
        max_files: 1,
        required_options: &[],
        collaborator: Collaborator::Ocr,
        output_suffix: "text",
    },
    ToolSpec {
        id: ToolId::PdfMerge,
        slug: "pdf-merge",
        title: "Merge PDF",
        description: "Combine multiple PDFs",
        accepted_extensions: PDF,
        min_files: 2,
        max_files: 20,
        required_options: &[],
        collaborator: Collaborator::Pdf,
        output_suffix: "merged",
    },
    ToolSpec {
        id: ToolId::PdfSplit,
        slug: "pdf-split",
        title: "Split PDF",
        description: "Split PDF pages",
        accepted_extensions: PDF,
        min_files: 1,
        max_files: 1,
        required_options: &[],
        collaborator: Collaborator::Pdf,
        output_suffix: "part",
    },
    ToolSpec {
        id: ToolId::PdfProtect,
        slug: "pdf-protect",
        title: "Protect PDF",
        description: "Add a password to a PDF",
        accepted_extensions: PDF,
        min_files: 1,
        max_files: 1,
        required_options: &["password"],
        collaborator: Collaborator::Pdf,
        output_suffix: "protected",
    },
    ToolSpec {
        id: ToolId::PdfCompress,
        slug: "pdf-compress",
        title: "Compress PDF",
        description: "Shrink a PDF towards a target size",
        accepted_extensions: PDF,
        min_files: 1,
        max_files: 1,
        required_options: &[],
        collaborator: Collaborator::Pdf,
        output_suffix: "compressed",
    },
    ToolSpec {
        id: ToolId::PdfWatermark,
        slug: "pdf-watermark",
        title: "Watermark PDF",
        description: "Stamp text across every page",
        accepted_extensions: PDF,
        min_files: 1,
        max_files: 1,
        required_options: &["text"],
        collaborator: Collaborator::Pdf,
        output_suffix: "watermarked",
    },
    ToolSpec {
        id: ToolId::PdfRotate,
        slug: "pdf-rotate",
        title: "Rotate PDF",
        description: "Rotate every page",
        accepted_extensions: PDF,
        min_files: 1,
        max_files: 1,
        required_options: &["angle"],
        collaborator: Collaborator::Pdf,
        output_suffix: "rotated",
    },
    ToolSpec {
        id: ToolId::ImageToPdf,
        slug: "image-to-pdf",
        title: "Image to PDF",
        description: "Convert images into a PDF",
        accepted_extensions: IMAGES,
        min_files: 1,
        max_files: 50,
        required_options: &[],
        collaborator: Collaborator::Pdf,
        output_suffix: "images",
    },
];

impl ToolId {
    /// All tool identifiers in dashboard order.
    pub fn all() -> impl Iterator<Item = ToolId> {
        TOOLS.iter().map(|t| t.id)
    }

    /// The table row for this tool.
    pub fn spec(self) -> &'static ToolSpec {
        // The table holds exactly one row per variant, in declaration order.
        &TOOLS[self as usize]
    }

    pub fn slug(self) -> &'static str {
        self.spec().slug
    }

    pub fn from_slug(slug: &str) -> Option<ToolId> {
        let slug = slug.trim().to_ascii_lowercase();
        TOOLS.iter().find(|t| t.slug == slug).map(|t| t.id)
    }

    /// Message shown on the processing step's terminal error state.
    pub fn failure_message(self) -> &'static str {
        match self {
            ToolId::Ocr => "Failed to extract text.",
            ToolId::PdfMerge => "Failed to merge PDFs.",
            ToolId::PdfSplit => "Failed to split PDF.",
            ToolId::PdfProtect => "Failed to protect PDF.",
            ToolId::PdfCompress => "Failed to compress PDF.",
            ToolId::PdfWatermark => "Failed to watermark PDF.",
            ToolId::PdfRotate => "Failed to rotate PDF.",
            ToolId::ImageToPdf => "Failed to convert images.",
        }
    }

    /// Headline shown when processing succeeds.
    pub fn success_message(self) -> &'static str {
        match self {
            ToolId::Ocr => "Text Extracted Successfully!",
            ToolId::PdfMerge => "PDFs Merged Successfully!",
            ToolId::PdfSplit => "PDF Split Successfully!",
            ToolId::PdfProtect => "PDF Protected Successfully!",
            ToolId::PdfCompress => "PDF Compressed Successfully!",
            ToolId::PdfWatermark => "PDF Watermarked Successfully!",
            ToolId::PdfRotate => "PDF Rotated Successfully!",
            ToolId::ImageToPdf => "Images Converted Successfully!",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ToolId {
    type Err = DocDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::from_slug(s).ok_or_else(|| DocDeskError::UnknownTool(s.to_string()))
    }
}

impl ToolSpec {
    /// Whether `file_name` carries one of the accepted extensions (case-insensitive).
    pub fn accepts(&self, file_name: &str) -> bool {
        if self.accepted_extensions.is_empty() {
            return true;
        }
        match extension_of(file_name) {
            Some(ext) => self.accepted_extensions.contains(&ext.as_str()),
            None => false,
        }
    }

    /// Accepted extensions joined for display: `.jpg, .jpeg, .png`.
    pub fn allowed_display(&self) -> String {
        self.accepted_extensions.join(", ")
    }

    /// Check file count and extensions of a selection.
    pub fn validate_names<'a>(
        &self,
        names: impl ExactSizeIterator<Item = &'a str>,
    ) -> Result<(), DocDeskError> {
        let got = names.len();
        if got == 0 {
            return Err(DocDeskError::EmptySelection);
        }
        if got < self.min_files {
            return Err(DocDeskError::TooFewFiles {
                tool: self.id,
                min: self.min_files,
                got,
            });
        }
        if got > self.max_files {
            return Err(DocDeskError::TooManyFiles {
                tool: self.id,
                max: self.max_files,
                got,
            });
        }
        for name in names {
            if !self.accepts(name) {
                return Err(DocDeskError::UnsupportedFileType {
                    name: name.to_string(),
                    allowed: self.allowed_display(),
                });
            }
        }
        Ok(())
    }
}

/// `.ext` of a file name, lower-cased.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Dashboard search: tools whose title contains `query`, case-insensitively.
pub fn search_tools(query: &str) -> Vec<&'static ToolSpec> {
    let needle = query.trim().to_lowercase();
    TOOLS
        .iter()
        .filter(|t| t.title.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_variants() {
        for (i, spec) in TOOLS.iter().enumerate() {
            assert_eq!(spec.id as usize, i, "row {i} is {:?}", spec.id);
            assert_eq!(spec.id.spec().slug, spec.slug);
        }
    }

    #[test]
    fn slugs_round_trip() {
        for id in ToolId::all() {
            assert_eq!(id.slug().parse::<ToolId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.slug()));
        }
        assert!(matches!(
            "pdf-redact".parse::<ToolId>(),
            Err(DocDeskError::UnknownTool(_))
        ));
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let ocr = ToolId::Ocr.spec();
        assert!(ocr.accepts("Scan.JPG"));
        assert!(ocr.accepts("photo.png"));
        assert!(!ocr.accepts("report.pdf"));
        assert!(!ocr.accepts("no_extension"));
        assert!(!ocr.accepts("trailing."));
    }

    #[test]
    fn merge_needs_two_files() {
        let merge = ToolId::PdfMerge.spec();
        let err = merge.validate_names(["a.pdf"].into_iter()).unwrap_err();
        assert!(matches!(err, DocDeskError::TooFewFiles { min: 2, got: 1, .. }));
        assert!(merge.validate_names(["a.pdf", "b.PDF"].into_iter()).is_ok());
    }

    #[test]
    fn single_file_tools_reject_extra_files() {
        let err = ToolId::PdfRotate
            .spec()
            .validate_names(["a.pdf", "b.pdf"].into_iter())
            .unwrap_err();
        assert!(matches!(err, DocDeskError::TooManyFiles { max: 1, got: 2, .. }));
    }

    #[test]
    fn unsupported_type_reports_allowed_list() {
        let err = ToolId::Ocr
            .spec()
            .validate_names(["doc.pdf"].into_iter())
            .unwrap_err();
        match err {
            DocDeskError::UnsupportedFileType { name, allowed } => {
                assert_eq!(name, "doc.pdf");
                assert_eq!(allowed, ".jpg, .jpeg, .png");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn search_by_title() {
        let hits: Vec<_> = search_tools("pdf").iter().map(|t| t.id).collect();
        assert!(hits.contains(&ToolId::PdfMerge));
        assert!(hits.contains(&ToolId::ImageToPdf));
        assert!(!hits.contains(&ToolId::Ocr));
        assert_eq!(search_tools("").len(), TOOLS.len());
        assert_eq!(search_tools("ocr")[0].id, ToolId::Ocr);
    }
}
