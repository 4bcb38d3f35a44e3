//! PCM16 transport codec
//!
//! Converts device samples (f32 in [-1.0, 1.0]) to 16-bit little-endian PCM
//! wrapped in base64, and back. Quantization is the only loss: for any input
//! sample `x`, `decode(encode(x))` is within 1/32768 of `x`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceError};

const PCM16_MIME: &str = "audio/pcm";

/// One audio frame serialized for the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportPacket {
    /// Format tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64-encoded PCM16 LE bytes
    pub data: String,
}

impl TransportPacket {
    pub fn pcm16(sample_rate: u32, data: String) -> Self {
        Self {
            mime_type: format!("{};rate={}", PCM16_MIME, sample_rate),
            data,
        }
    }

    /// Sample rate declared in the format tag, if any
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }

    pub fn is_pcm16(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .map(|base| base.trim().eq_ignore_ascii_case(PCM16_MIME))
            .unwrap_or(false)
    }
}

/// Scale one float sample into the i16 range, clamping on overflow
pub fn float_to_pcm16(sample: f32) -> i16 {
    let scaled = (sample * 32768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode float samples as a PCM16 transport packet
pub fn encode(samples: &[f32], sample_rate: u32) -> TransportPacket {
    let pcm_bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| float_to_pcm16(s).to_le_bytes())
        .collect();

    TransportPacket::pcm16(
        sample_rate,
        base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
    )
}

/// Decode a PCM16 transport packet back into float samples
pub fn decode(packet: &TransportPacket) -> Result<Vec<f32>> {
    if !packet.is_pcm16() {
        return Err(VoiceError::MalformedPacket(format!(
            "unsupported format {:?}",
            packet.mime_type
        )));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(packet.data.as_bytes())
        .map_err(|e| VoiceError::MalformedPacket(format!("invalid base64: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceError::MalformedPacket(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}
