//! Image conditioning: fits an image into the service's pixel and payload ceilings.
//!
//! The service only accepts images up to `max_dimension` pixels on the long
//! side and `max_payload_bytes` in size, so every input goes through
//! [`condition`] before submission. Output is always JPEG. The step is pure:
//! same bytes and limits in, same payload out.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::error::FailureKind;

/// Service ceilings a payload must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_dimension: u32,
    pub max_payload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_dimension: 4096,
            max_payload_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Limits strictly tighter than what `payload` already achieved.
    ///
    /// Used on the repair path: the service rejected `payload`, so the next
    /// attempt must be smaller in both pixels and bytes.
    pub fn tightened_for(&self, payload: &ConditionedPayload, factor: f64) -> Limits {
        let dimension = self.max_dimension.min(payload.width.max(payload.height));
        let bytes = self.max_payload_bytes.min(payload.byte_size());
        Limits {
            max_dimension: ((dimension as f64 * factor) as u32).max(1),
            max_payload_bytes: ((bytes as f64 * factor) as usize).max(1),
        }
    }
}

/// Descending JPEG quality levels tried until the payload fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityLadder {
    pub start: u8,
    pub step: u8,
    pub floor: u8,
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            start: 95,
            step: 5,
            floor: 65,
        }
    }
}

impl QualityLadder {
    /// Quality levels from `start` down to `floor` inclusive. The floor is
    /// always the last level, even when `step` does not land on it.
    pub fn qualities(&self) -> impl Iterator<Item = u8> {
        let step = self.step.max(1);
        let floor = self.floor;
        std::iter::successors(Some(self.start), move |&q| {
            (q > floor).then(|| q.saturating_sub(step).max(floor))
        })
        .take_while(move |q| *q >= floor)
    }
}

/// Image bytes ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionedPayload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// JPEG quality used to encode, `None` when the input passed through untouched.
    pub quality: Option<u8>,
}

impl ConditionedPayload {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn max_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("cannot decode image: {0}")]
    Undecodable(String),

    #[error("image is still {size} bytes at quality {quality} (limit {limit})")]
    TooLarge {
        size: usize,
        quality: u8,
        limit: usize,
    },

    #[error("cannot encode image: {0}")]
    Encode(String),
}

impl ConditionError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Unrepairable
    }
}

/// Conditions `bytes`, passing a conforming JPEG through unchanged.
pub fn condition(
    bytes: &[u8],
    limits: &Limits,
    ladder: &QualityLadder,
) -> Result<ConditionedPayload, ConditionError> {
    condition_with(bytes, limits, ladder, false)
}

/// Conditions `bytes`, always re-encoding. Used on the repair path.
pub fn condition_forced(
    bytes: &[u8],
    limits: &Limits,
    ladder: &QualityLadder,
) -> Result<ConditionedPayload, ConditionError> {
    condition_with(bytes, limits, ladder, true)
}

fn condition_with(
    bytes: &[u8],
    limits: &Limits,
    ladder: &QualityLadder,
    force: bool,
) -> Result<ConditionedPayload, ConditionError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ConditionError::Undecodable(e.to_string()))?;
    let source_format = reader.format();
    let img = reader
        .decode()
        .map_err(|e| ConditionError::Undecodable(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    let fits = width.max(height) <= limits.max_dimension;

    if !force
        && fits
        && source_format == Some(ImageFormat::Jpeg)
        && bytes.len() <= limits.max_payload_bytes
    {
        debug!(width, height, size = bytes.len(), "image already conforms");
        return Ok(ConditionedPayload {
            bytes: bytes.to_vec(),
            width,
            height,
            format: ImageFormat::Jpeg,
            quality: None,
        });
    }

    let img = if fits {
        img
    } else {
        // resize() keeps the aspect ratio and fits inside the box.
        let resized = img.resize(
            limits.max_dimension,
            limits.max_dimension,
            FilterType::Lanczos3,
        );
        debug!(
            from = %format!("{width}x{height}"),
            to = %format!("{}x{}", resized.width(), resized.height()),
            "downscaled image"
        );
        resized
    };

    let rgb = img.to_rgb8();
    let mut smallest = (bytes.len(), ladder.start);
    for quality in ladder.qualities() {
        let encoded = encode_jpeg(&rgb, quality)?;
        if encoded.len() <= limits.max_payload_bytes {
            return Ok(ConditionedPayload {
                width: rgb.width(),
                height: rgb.height(),
                bytes: encoded,
                format: ImageFormat::Jpeg,
                quality: Some(quality),
            });
        }
        debug!(quality, size = encoded.len(), limit = limits.max_payload_bytes, "payload too large");
        smallest = (encoded.len(), quality);
    }

    Err(ConditionError::TooLarge {
        size: smallest.0,
        quality: smallest.1,
        limit: limits.max_payload_bytes,
    })
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, ConditionError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ConditionError::Encode(e.to_string()))?;
    Ok(out)
}
