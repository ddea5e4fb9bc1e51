//! Typed tool parameters.
//!
//! [`StagingOptions`] travel through the store as opaque strings; the
//! processing step turns them into a [`ToolParams`] value before dispatching
//! to a collaborator. Parsing is strict: a malformed value is an
//! [`DocDeskError::InvalidOption`], never silently replaced by a default.

use crate::error::DocDeskError;
use crate::stage::record::StagingOptions;
use crate::tools::ToolId;
use once_cell::sync::Lazy;
use regex::Regex;

/// Target size used by `pdf-compress` when none is given.
pub const DEFAULT_TARGET_SIZE: &str = "1MB";
/// OCR language used when none is given.
pub const DEFAULT_LANGUAGE: &str = "eng";
/// Watermark opacity used when none is given.
pub const DEFAULT_OPACITY: f32 = 0.3;

/// A 1-indexed, inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// 0-indexed bounds, clamped to a document of `page_count` pages.
    /// `None` when the range lies entirely past the end.
    pub fn to_indices(self, page_count: u32) -> Option<(u32, u32)> {
        if self.start > page_count {
            return None;
        }
        Some((self.start - 1, self.end.min(page_count) - 1))
    }
}

/// Quarter-turn page rotation, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    /// Normalise any multiple of 90 (negative means counter-clockwise).
    pub fn from_degrees(degrees: i32) -> Result<Self, DocDeskError> {
        let invalid = |reason: &str| DocDeskError::InvalidOption {
            key: "angle".into(),
            reason: format!("{degrees}: {reason}"),
        };
        if degrees % 90 != 0 {
            return Err(invalid("must be a multiple of 90"));
        }
        match degrees.rem_euclid(360) {
            90 => Ok(Rotation::Quarter),
            180 => Ok(Rotation::Half),
            270 => Ok(Rotation::ThreeQuarter),
            _ => Err(invalid("a full turn leaves the document unchanged")),
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }
}

/// Parsed parameters for one tool run.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParams {
    Ocr { language: String },
    Merge,
    /// `None` splits every page into its own document.
    Split { ranges: Option<Vec<PageRange>> },
    Protect { password: String },
    Compress { target_bytes: u64 },
    Watermark { text: String, opacity: f32 },
    Rotate { rotation: Rotation },
    ImageToPdf,
}

impl ToolParams {
    pub fn from_options(tool: ToolId, options: &StagingOptions) -> Result<Self, DocDeskError> {
        check_required(tool, options)?;
        let get = |key: &str| options.get(key).map(str::trim).filter(|v| !v.is_empty());

        Ok(match tool {
            ToolId::Ocr => ToolParams::Ocr {
                language: get("language").unwrap_or(DEFAULT_LANGUAGE).to_string(),
            },
            ToolId::PdfMerge => ToolParams::Merge,
            ToolId::PdfSplit => ToolParams::Split {
                ranges: get("ranges").map(parse_page_ranges).transpose()?,
            },
            ToolId::PdfProtect => ToolParams::Protect {
                // Passwords are taken verbatim, surrounding spaces included.
                password: options.get("password").unwrap_or_default().to_string(),
            },
            ToolId::PdfCompress => ToolParams::Compress {
                target_bytes: parse_target_size(get("target_size").unwrap_or(DEFAULT_TARGET_SIZE))?,
            },
            ToolId::PdfWatermark => ToolParams::Watermark {
                text: get("text").unwrap_or_default().to_string(),
                opacity: get("opacity")
                    .map(parse_opacity)
                    .transpose()?
                    .unwrap_or(DEFAULT_OPACITY),
            },
            ToolId::PdfRotate => {
                let raw = get("angle").unwrap_or_default();
                let degrees = raw.parse::<i32>().map_err(|_| DocDeskError::InvalidOption {
                    key: "angle".into(),
                    reason: format!("'{raw}' is not a whole number of degrees"),
                })?;
                ToolParams::Rotate {
                    rotation: Rotation::from_degrees(degrees)?,
                }
            }
            ToolId::ImageToPdf => ToolParams::ImageToPdf,
        })
    }
}

/// Fail with [`DocDeskError::MissingOption`] for the first required option
/// that is absent or blank.
pub fn check_required(tool: ToolId, options: &StagingOptions) -> Result<(), DocDeskError> {
    for key in tool.spec().required_options {
        let present = options.get(key).is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(DocDeskError::MissingOption {
                tool,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

static RE_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|kb|mb|gb)?\s*$").unwrap());

/// `"500KB"`, `"1.5 MB"`, `"2048"` → bytes (binary multiples).
pub fn parse_target_size(input: &str) -> Result<u64, DocDeskError> {
    let invalid = |reason: &str| DocDeskError::InvalidOption {
        key: "target_size".into(),
        reason: format!("'{input}': {reason}"),
    };
    let caps = RE_SIZE
        .captures(input)
        .ok_or_else(|| invalid("expected a size like 500KB or 1MB"))?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| invalid("not a number"))?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    let multiplier = match unit.as_str() {
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    let bytes = (value * multiplier).round();
    if bytes < 1.0 {
        return Err(invalid("must be at least one byte"));
    }
    Ok(bytes as u64)
}

/// `"1-3,5"` → `[1..=3, 5..=5]`. Pages are 1-indexed; ranges are inclusive.
pub fn parse_page_ranges(input: &str) -> Result<Vec<PageRange>, DocDeskError> {
    let invalid = |reason: String| DocDeskError::InvalidOption {
        key: "ranges".into(),
        reason,
    };
    let page = |s: &str| -> Result<u32, DocDeskError> {
        match s.trim().parse::<u32>() {
            Ok(0) => Err(invalid("pages are numbered from 1".into())),
            Ok(n) => Ok(n),
            Err(_) => Err(invalid(format!("'{}' is not a page number", s.trim()))),
        }
    };

    let mut ranges = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((a, b)) => PageRange {
                start: page(a)?,
                end: page(b)?,
            },
            None => {
                let n = page(part)?;
                PageRange { start: n, end: n }
            }
        };
        if range.start > range.end {
            return Err(invalid(format!("'{part}' runs backwards")));
        }
        ranges.push(range);
    }
    if ranges.is_empty() {
        return Err(invalid("no pages selected".into()));
    }
    Ok(ranges)
}

fn parse_opacity(input: &str) -> Result<f32, DocDeskError> {
    let value: f32 = input.parse().map_err(|_| DocDeskError::InvalidOption {
        key: "opacity".into(),
        reason: format!("'{input}' is not a number"),
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(DocDeskError::InvalidOption {
            key: "opacity".into(),
            reason: format!("{value} is outside 0.0–1.0"),
        });
    }
    Ok(value)
}
