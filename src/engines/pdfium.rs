//! PDF transformations via pdfium.
//!
//! pdfium is CPU-bound and keeps thread-local state, so every transformation
//! runs inside `tokio::task::spawn_blocking` with its own binding.
//!
//! The library is located at runtime: `PDFIUM_LIB_PATH` (a directory) first,
//! then the system library search path.

use super::{output_name, OutputDocument, PdfEngine, PdfInput, PdfRequest};
use crate::error::DocDeskError;
use crate::options::{PageRange, Rotation, ToolParams};
use crate::tools::ToolId;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raster widths tried, in order, when re-saving alone misses the target size.
const RASTER_WIDTHS: &[i32] = &[1654, 1240, 827, 620];

#[cfg(target_os = "macos")]
const LIB_NAME: &str = "libpdfium.dylib";
#[cfg(target_os = "windows")]
const LIB_NAME: &str = "pdfium.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIB_NAME: &str = "libpdfium.so";

/// Font size of watermark text, in points.
const WATERMARK_FONT_SIZE: f32 = 48.0;

/// [`PdfEngine`] backed by a dynamically bound pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    library_dir: Option<PathBuf>,
}

impl PdfiumEngine {
    /// Engine that honours `PDFIUM_LIB_PATH`, falling back to the system library.
    pub fn new() -> Self {
        Self {
            library_dir: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Engine bound to the pdfium library inside `dir`.
    pub fn with_library_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(dir.into()),
        }
    }
}

fn bind(library_dir: Option<&Path>) -> Result<Pdfium, DocDeskError> {
    let bindings = match library_dir {
        Some(dir) => {
            let lib = dir.join(LIB_NAME);
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib).or_else(|e| {
                warn!("{}: {:?}; trying the system library", lib.display(), e);
                Pdfium::bind_to_system_library()
            })
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DocDeskError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

#[async_trait]
impl PdfEngine for PdfiumEngine {
    fn name(&self) -> &str {
        "pdfium"
    }

    // pdfium can open encrypted documents but never writes them.
    fn supports(&self, tool: ToolId) -> bool {
        tool != ToolId::PdfProtect
    }

    async fn transform(&self, request: PdfRequest) -> Result<Vec<OutputDocument>, DocDeskError> {
        if !self.supports(request.tool) {
            return Err(DocDeskError::UnsupportedOperation {
                tool: request.tool,
                engine: self.name().to_string(),
            });
        }
        if request.inputs.is_empty() {
            return Err(DocDeskError::EmptySelection);
        }

        let library_dir = self.library_dir.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(library_dir.as_deref())?;
            transform_blocking(&pdfium, &request)
        })
        .await
        .map_err(|e| DocDeskError::Internal(format!("PDF task panicked: {}", e)))?
    }
}

fn transform_blocking(
    pdfium: &Pdfium,
    request: &PdfRequest,
) -> Result<Vec<OutputDocument>, DocDeskError> {
    let tool = request.tool;
    let inputs = &request.inputs;
    let first = &inputs[0];
    let suffix = tool.spec().output_suffix;
    let single = |bytes: Vec<u8>| {
        vec![OutputDocument::pdf(
            output_name(&first.name, suffix, None, "pdf"),
            bytes,
        )]
    };

    let docs = match &request.params {
        ToolParams::Merge => single(merge(pdfium, tool, inputs)?),
        ToolParams::Split { ranges } => split(pdfium, tool, first, ranges.as_deref())?,
        ToolParams::Rotate { rotation } => single(rotate(pdfium, tool, first, *rotation)?),
        ToolParams::Watermark { text, opacity } => {
            single(watermark(pdfium, tool, first, text, *opacity)?)
        }
        ToolParams::Compress { target_bytes } => {
            single(compress(pdfium, tool, first, *target_bytes)?)
        }
        ToolParams::ImageToPdf => single(images_to_pdf(pdfium, tool, inputs)?),
        ToolParams::Protect { .. } | ToolParams::Ocr { .. } => {
            return Err(DocDeskError::UnsupportedOperation {
                tool,
                engine: "pdfium".to_string(),
            })
        }
    };

    info!(
        "{}: produced {} document(s), {} bytes",
        tool,
        docs.len(),
        docs.iter().map(|d| d.bytes.len()).sum::<usize>()
    );
    Ok(docs)
}

fn failed(tool: ToolId) -> impl Fn(PdfiumError) -> DocDeskError {
    move |e| DocDeskError::TransformationFailed {
        tool,
        detail: format!("{:?}", e),
    }
}

fn load<'a>(
    pdfium: &'a Pdfium,
    tool: ToolId,
    input: &'a PdfInput,
) -> Result<PdfDocument<'a>, DocDeskError> {
    pdfium
        .load_pdf_from_byte_slice(&input.bytes, None)
        .map_err(|e| DocDeskError::TransformationFailed {
            tool,
            detail: format!("'{}' could not be opened: {:?}", input.name, e),
        })
}

fn merge(pdfium: &Pdfium, tool: ToolId, inputs: &[PdfInput]) -> Result<Vec<u8>, DocDeskError> {
    let mut merged = pdfium.create_new_pdf().map_err(failed(tool))?;
    for input in inputs {
        let source = load(pdfium, tool, input)?;
        debug!("Appending {} ({} pages)", input.name, source.pages().len());
        merged.pages_mut().append(&source).map_err(failed(tool))?;
    }
    merged.save_to_bytes().map_err(failed(tool))
}

fn split(
    pdfium: &Pdfium,
    tool: ToolId,
    input: &PdfInput,
    ranges: Option<&[PageRange]>,
) -> Result<Vec<OutputDocument>, DocDeskError> {
    let source = load(pdfium, tool, input)?;
    let page_count = source.pages().len() as u32;

    let spans: Vec<(u32, u32)> = match ranges {
        None => (0..page_count).map(|i| (i, i)).collect(),
        Some(ranges) => ranges.iter().filter_map(|r| r.to_indices(page_count)).collect(),
    };
    if spans.is_empty() {
        return Err(DocDeskError::TransformationFailed {
            tool,
            detail: format!("none of the selected pages exist ({page_count} pages)"),
        });
    }

    let suffix = tool.spec().output_suffix;
    let mut parts = Vec::with_capacity(spans.len());
    for (n, (start, end)) in spans.into_iter().enumerate() {
        let mut part = pdfium.create_new_pdf().map_err(failed(tool))?;
        part.pages_mut()
            .copy_page_range_from_document(
                &source,
                (start as PdfPageIndex)..=(end as PdfPageIndex),
                0,
            )
            .map_err(failed(tool))?;
        let bytes = part.save_to_bytes().map_err(failed(tool))?;
        parts.push(OutputDocument::pdf(
            output_name(&input.name, suffix, Some(n + 1), "pdf"),
            bytes,
        ));
    }
    Ok(parts)
}

fn rotation_degrees(r: PdfPageRenderRotation) -> u16 {
    match r {
        PdfPageRenderRotation::None => 0,
        PdfPageRenderRotation::Degrees90 => 90,
        PdfPageRenderRotation::Degrees180 => 180,
        PdfPageRenderRotation::Degrees270 => 270,
    }
}

fn render_rotation(degrees: u16) -> PdfPageRenderRotation {
    match degrees % 360 {
        90 => PdfPageRenderRotation::Degrees90,
        180 => PdfPageRenderRotation::Degrees180,
        270 => PdfPageRenderRotation::Degrees270,
        _ => PdfPageRenderRotation::None,
    }
}

fn rotate(
    pdfium: &Pdfium,
    tool: ToolId,
    input: &PdfInput,
    rotation: Rotation,
) -> Result<Vec<u8>, DocDeskError> {
    let document = load(pdfium, tool, input)?;
    for mut page in document.pages().iter() {
        // Rotation is relative to however the page is already turned.
        let current = page.rotation().map(rotation_degrees).unwrap_or(0);
        page.set_rotation(render_rotation(current + rotation.degrees()));
    }
    document.save_to_bytes().map_err(failed(tool))
}

fn watermark(
    pdfium: &Pdfium,
    tool: ToolId,
    input: &PdfInput,
    text: &str,
    opacity: f32,
) -> Result<Vec<u8>, DocDeskError> {
    let mut document = load(pdfium, tool, input)?;
    let font = document.fonts_mut().helvetica();
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;

    for mut page in document.pages().iter() {
        let (width, height) = (page.width().value, page.height().value);
        let mut object =
            PdfPageTextObject::new(&document, text, font, PdfPoints::new(WATERMARK_FONT_SIZE))
                .map_err(failed(tool))?;
        object
            .set_fill_color(PdfColor::new(128, 128, 128, alpha))
            .map_err(failed(tool))?;
        object
            .rotate_counter_clockwise_degrees(45.0)
            .map_err(failed(tool))?;
        object
            .translate(PdfPoints::new(width * 0.2), PdfPoints::new(height * 0.3))
            .map_err(failed(tool))?;
        page.objects_mut()
            .add_text_object(object)
            .map_err(failed(tool))?;
    }
    document.save_to_bytes().map_err(failed(tool))
}

/// Pixels at 96 dpi to PDF points.
fn px_to_points(px: u32) -> f32 {
    px as f32 * 72.0 / 96.0
}

fn place_full_page(
    document: &mut PdfDocument<'_>,
    tool: ToolId,
    image: &DynamicImage,
    width: PdfPoints,
    height: PdfPoints,
) -> Result<(), DocDeskError> {
    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::Custom(width, height))
        .map_err(failed(tool))?;
    page.objects_mut()
        .create_image_object(
            PdfPoints::new(0.0),
            PdfPoints::new(0.0),
            image,
            Some(width),
            Some(height),
        )
        .map_err(failed(tool))?;
    Ok(())
}

fn images_to_pdf(
    pdfium: &Pdfium,
    tool: ToolId,
    inputs: &[PdfInput],
) -> Result<Vec<u8>, DocDeskError> {
    let mut document = pdfium.create_new_pdf().map_err(failed(tool))?;
    for input in inputs {
        let image = image::load_from_memory(&input.bytes).map_err(|e| {
            DocDeskError::TransformationFailed {
                tool,
                detail: format!("'{}' is not a readable image: {}", input.name, e),
            }
        })?;
        let (w, h) = (px_to_points(image.width()), px_to_points(image.height()));
        debug!("{} → {}x{} pt page", input.name, w, h);
        place_full_page(&mut document, tool, &image, PdfPoints::new(w), PdfPoints::new(h))?;
    }
    document.save_to_bytes().map_err(failed(tool))
}

/// Re-render every page as an image `width` pixels wide.
fn rasterise(
    pdfium: &Pdfium,
    tool: ToolId,
    source: &PdfDocument<'_>,
    width: i32,
) -> Result<Vec<u8>, DocDeskError> {
    let mut rebuilt = pdfium.create_new_pdf().map_err(failed(tool))?;
    let render_config = PdfRenderConfig::new().set_target_width(width);
    for page in source.pages().iter() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(failed(tool))?;
        // No alpha: smaller image streams.
        let image = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
        place_full_page(&mut rebuilt, tool, &image, page.width(), page.height())?;
    }
    rebuilt.save_to_bytes().map_err(failed(tool))
}

fn compress(
    pdfium: &Pdfium,
    tool: ToolId,
    input: &PdfInput,
    target_bytes: u64,
) -> Result<Vec<u8>, DocDeskError> {
    let document = load(pdfium, tool, input)?;
    let resaved = document.save_to_bytes().map_err(failed(tool))?;
    let mut best = if resaved.len() < input.bytes.len() {
        resaved
    } else {
        input.bytes.clone()
    };
    debug!("Re-saved {} → {} bytes", input.bytes.len(), best.len());

    for &width in RASTER_WIDTHS {
        if best.len() as u64 <= target_bytes {
            break;
        }
        let candidate = rasterise(pdfium, tool, &document, width)?;
        debug!("Rasterised at {}px → {} bytes", width, candidate.len());
        if candidate.len() < best.len() {
            best = candidate;
        }
    }

    if best.len() as u64 > target_bytes {
        warn!(
            "{}: smallest result is {} bytes, above the {} byte target",
            input.name,
            best.len(),
            target_bytes
        );
    }
    Ok(best)
}
