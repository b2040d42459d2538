//! PCM16 conversions and the base64 transport encoding.
//!
//! Wire audio is mono signed 16-bit little-endian PCM, base64-encoded
//! (standard alphabet, padded). Capture and playback work in f32 samples in
//! \[-1, 1\].

use crate::error::{LiveError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Scale applied when converting captured f32 samples to PCM16.
const CAPTURE_SCALE: f32 = 32_767.0;

/// Divisor applied when normalizing inbound PCM16 samples to f32.
const PLAYBACK_DIVISOR: f32 = 32_768.0;

/// Serialize samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes back into samples.
///
/// # Errors
///
/// Returns [`LiveError::Codec`] if the byte count is odd.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Codec(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode arbitrary bytes for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Encode PCM16 samples for the wire.
pub fn encode_pcm16(samples: &[i16]) -> String {
    encode_base64(&pcm16_to_bytes(samples))
}

/// Decode a wire payload back into PCM16 samples.
///
/// # Errors
///
/// Returns [`LiveError::Codec`] if the payload is not valid base64 or does
/// not hold a whole number of samples.
pub fn decode_pcm16(content: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(content)
        .map_err(|e| LiveError::Codec(format!("invalid base64 audio: {e}")))?;
    bytes_to_pcm16(&bytes)
}

/// Convert captured f32 samples to PCM16, clamping to \[-1, 1\] first.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * CAPTURE_SCALE) as i16)
        .collect()
}

/// Normalize PCM16 samples to f32 and apply `gain`.
pub fn pcm16_to_float(samples: &[i16], gain: f32) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| f32::from(s) / PLAYBACK_DIVISOR * gain)
        .collect()
}
