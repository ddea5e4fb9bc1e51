//! Image compression pass for payloads too large for the facility.
//!
//! The image is bounded to `max_edge` pixels on its longer side, then
//! re-encoded as JPEG at decreasing quality until its data URL fits the
//! budget or the quality floor is reached. The last attempt is returned even
//! when it is still over budget; the caller decides where it goes.
//!
//! Decoding and encoding are CPU-bound, so [`compress_image_async`] moves
//! the work onto tokio's blocking pool.

use crate::config::CompressionSettings;
use crate::error::CompressionError;
use crate::stage::payload::data_url_len;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::debug;

/// Mime type of every compressed payload.
pub const COMPRESSED_MIME: &str = "image/jpeg";

/// Result of the compression pass.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// JPEG bytes of the last attempt.
    pub bytes: Vec<u8>,
    /// Quality of the last attempt.
    pub quality: u8,
    /// Every quality tried, in order. Strictly decreasing.
    pub attempts: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Data URL length of the last attempt.
    pub payload_len: usize,
    /// Whether the last attempt fits the budget.
    pub within_budget: bool,
}

/// Dimensions after bounding the longer edge to `max_edge`, aspect preserved.
pub fn bounded_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }
    let (w, h, max) = (width as f64, height as f64, max_edge as f64);
    let (w, h) = if w > h {
        (max, h / w * max)
    } else {
        (w / h * max, max)
    };
    ((w.round() as u32).max(1), (h.round() as u32).max(1))
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

/// Compress `raw` towards `budget` bytes of data URL.
pub fn compress_image(
    raw: &[u8],
    budget: usize,
    settings: &CompressionSettings,
) -> Result<CompressionOutcome, CompressionError> {
    let img = image::load_from_memory(raw)?;
    let (w, h) = bounded_dimensions(img.width(), img.height(), settings.max_edge);
    let img = if (w, h) != (img.width(), img.height()) {
        debug!(
            "Downscaling {}x{} → {}x{} before compression",
            img.width(),
            img.height(),
            w,
            h
        );
        img.resize_exact(w, h, FilterType::Triangle)
    } else {
        img
    };
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();

    let step = settings.quality_step.max(1);
    let floor = settings.min_quality.max(1);
    let mut quality = settings.initial_quality.clamp(floor, 100);
    let mut attempts = Vec::new();

    loop {
        let bytes = encode_jpeg(&rgb, quality)?;
        attempts.push(quality);
        let payload_len = data_url_len(COMPRESSED_MIME, bytes.len());
        debug!("JPEG q={} → {} bytes of payload", quality, payload_len);

        let within_budget = payload_len <= budget;
        if within_budget || quality <= floor {
            return Ok(CompressionOutcome {
                bytes,
                quality,
                attempts,
                width: w,
                height: h,
                payload_len,
                within_budget,
            });
        }
        quality = quality.saturating_sub(step).max(floor);
    }
}

/// [`compress_image`] on the blocking pool.
pub async fn compress_image_async(
    raw: Vec<u8>,
    budget: usize,
    settings: CompressionSettings,
) -> Result<CompressionOutcome, CompressionError> {
    tokio::task::spawn_blocking(move || compress_image(&raw, budget, &settings))
        .await
        .map_err(|e| CompressionError::Task(e.to_string()))?
}
