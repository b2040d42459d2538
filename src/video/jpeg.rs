//! Still-frame JPEG encoding.

use crate::error::{LiveError, Result};
use image::{DynamicImage, RgbImage};

/// Scale `frame` so its longest side is at most `max_dimension`, then encode
/// it as JPEG.
///
/// # Errors
///
/// Returns [`LiveError::Codec`] for empty frames or encoder failures.
pub fn encode_jpeg(frame: RgbImage, quality: u8, max_dimension: u32) -> Result<Vec<u8>> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(LiveError::Codec("cannot encode an empty frame".into()));
    }

    let img = DynamicImage::ImageRgb8(frame);
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| LiveError::Codec(format!("jpeg encode failed: {e}")))?;
    Ok(buf)
}
