//! PCM16 codec between normalized samples and the session's wire blobs
//!
//! Encoding scales by 32767 and saturates, decoding divides by 32768. Both are
//! pure functions with no clock or device dependency.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::backend::AudioFrame;
use crate::error::{VoiceError, VoiceResult};

/// Base MIME type of 16-bit little-endian mono PCM
pub const PCM_MIME_BASE: &str = "audio/pcm";

const ENCODE_SCALE: f32 = 32767.0;
const DECODE_SCALE: f32 = 32768.0;

/// Wire form of an audio frame: packed bytes plus a type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBlob {
    /// PCM16 little-endian bytes
    pub data: Vec<u8>,
    /// Type tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl TransportBlob {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Build a blob from the base64 payload carried in JSON messages
    pub fn from_base64(data: &str, mime_type: impl Into<String>) -> VoiceResult<Self> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| VoiceError::MalformedAudioData(format!("invalid base64: {}", e)))?;
        Ok(Self::new(bytes, mime_type))
    }

    /// Base64 payload for JSON messages
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Sample rate declared by the type tag
    pub fn sample_rate(&self) -> VoiceResult<u32> {
        parse_mime_type(&self.mime_type)
    }
}

/// Type tag for mono PCM16 at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_BASE, sample_rate)
}

/// Parse `audio/pcm;rate=<hz>` and return the rate
///
/// Parameter order and whitespace are not significant; the base type is
/// matched case-insensitively.
pub fn parse_mime_type(mime_type: &str) -> VoiceResult<u32> {
    let unrecognized =
        || VoiceError::MalformedAudioData(format!("unrecognized audio type '{}'", mime_type));

    let mut parts = mime_type.split(';').map(str::trim);
    let base = parts.next().unwrap_or_default();
    if !base.eq_ignore_ascii_case(PCM_MIME_BASE) {
        return Err(unrecognized());
    }

    parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
        .ok_or_else(unrecognized)
}

/// Encode a normalized frame into a PCM16 blob
///
/// Out-of-range samples saturate at the i16 bounds instead of wrapping.
pub fn encode(frame: &AudioFrame) -> TransportBlob {
    let data: Vec<u8> = frame
        .samples
        .iter()
        .map(|&s| sample_to_i16(s))
        .flat_map(|s| s.to_le_bytes())
        .collect();

    TransportBlob::new(data, pcm_mime_type(frame.sample_rate))
}

/// Decode a PCM16 blob into a normalized mono frame
pub fn decode(blob: &TransportBlob) -> VoiceResult<AudioFrame> {
    let sample_rate = blob.sample_rate()?;

    if blob.data.len() % 2 != 0 {
        return Err(VoiceError::MalformedAudioData(format!(
            "odd byte length {}",
            blob.data.len()
        )));
    }

    let samples = blob
        .data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / DECODE_SCALE)
        .collect();

    Ok(AudioFrame::mono(samples, sample_rate))
}

fn sample_to_i16(sample: f32) -> i16 {
    // NaN maps to silence
    if sample.is_nan() {
        return 0;
    }
    (sample * ENCODE_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
