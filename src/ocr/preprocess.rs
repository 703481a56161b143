//! Image preparation for OCR
//!
//! Decodes the uploaded image, upscales tiny captures and caps very large
//! ones before recognition.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

use super::types::OcrError;

/// Below this size on either side recognition is skipped
pub const MIN_OCR_SIDE: u32 = 32;

/// Resize bounds applied before recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePolicy {
    /// Smaller side is scaled up to this when below it (0 disables)
    pub min_side_for_upscale: u32,
    /// Larger side is scaled down to this when above it
    pub max_side: u32,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            min_side_for_upscale: 100,
            max_side: 1800,
        }
    }
}

/// Outcome of [`fit`]
#[derive(Debug)]
pub enum Prepared {
    Ready(RgbImage),
    TooSmall { width: u32, height: u32 },
}

/// Decode any supported image format into RGB8
pub fn decode(bytes: &[u8]) -> Result<RgbImage, OcrError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| OcrError::InvalidImage(format!("Failed to decode image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Apply the resize policy
pub fn fit(image: RgbImage, policy: ResizePolicy) -> Prepared {
    let mut image = image;
    let (width, height) = image.dimensions();

    if policy.min_side_for_upscale > 0 && width.min(height) < policy.min_side_for_upscale {
        if let Some((w, h)) = scale_smaller_side(width, height, policy.min_side_for_upscale) {
            tracing::info!("Upscaling image {}x{} -> {}x{}", width, height, w, h);
            image = imageops::resize(&image, w, h, FilterType::Lanczos3);
        }
    }

    let (width, height) = image.dimensions();
    if width < MIN_OCR_SIDE || height < MIN_OCR_SIDE {
        tracing::warn!("Image too small for OCR ({}x{})", width, height);
        return Prepared::TooSmall { width, height };
    }

    if width.max(height) > policy.max_side {
        let (w, h) = scale_larger_side(width, height, policy.max_side);
        tracing::debug!("Downscaling image {}x{} -> {}x{}", width, height, w, h);
        image = imageops::resize(&image, w, h, FilterType::Lanczos3);
    }

    Prepared::Ready(image)
}

/// Decode, fit and re-encode as PNG for the engine; `None` when too small
pub fn prepare(bytes: &[u8], policy: ResizePolicy) -> Result<Option<Vec<u8>>, OcrError> {
    match fit(decode(bytes)?, policy) {
        Prepared::Ready(image) => encode_png(&image).map(Some),
        Prepared::TooSmall { .. } => Ok(None),
    }
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, OcrError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| OcrError::InvalidImage(format!("Failed to encode image: {}", e)))?;
    Ok(buffer)
}

/// Dimensions with the smaller side set exactly to `target`
fn scale_smaller_side(width: u32, height: u32, target: u32) -> Option<(u32, u32)> {
    let small = width.min(height);
    if small == 0 {
        return None;
    }
    let other = scale(width.max(height), target, small);
    Some(if width <= height {
        (target, other)
    } else {
        (other, target)
    })
}

/// Dimensions with the larger side set exactly to `target`
fn scale_larger_side(width: u32, height: u32, target: u32) -> (u32, u32) {
    let large = width.max(height);
    let other = scale(width.min(height), target, large).max(1);
    if width >= height {
        (target, other)
    } else {
        (other, target)
    }
}

/// `value * num / den`, rounded to nearest
fn scale(value: u32, num: u32, den: u32) -> u32 {
    let scaled = (value as u64 * num as u64 + den as u64 / 2) / den as u64;
    scaled.min(u32::MAX as u64) as u32
}
