//! PCM wire codec.
//!
//! Pure conversions between raw 16-bit sample buffers and the base64
//! representation used on the live-session wire. Capture audio is 16 kHz
//! mono; synthesized audio comes back at 24 kHz mono.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use std::time::Duration;

/// Sample rate of captured microphone audio in Hz.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized/response audio in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Number of samples per capture frame (the encoder block size).
///
/// 4096 samples at 16 kHz is one frame every ~256 ms.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// MIME tag attached to outbound capture frames.
pub const PCM_MIME_16K: &str = "audio/pcm;rate=16000";

/// Errors produced while decoding an inbound audio payload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// The payload was not valid base64.
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded byte length cannot hold whole 16-bit samples.
    #[error("audio payload has odd byte length {0}, expected 16-bit samples")]
    OddLength(usize),
}

/// Result type for codec operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// A fixed-length buffer of signed 16-bit mono samples at a known rate.
///
/// Frames are immutable once produced; the sample storage is shared so
/// clones are cheap on the hot capture/playback paths.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock duration of this frame at its sample rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// An [`AudioFrame`]'s byte payload plus its MIME tag, ready to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64-encoded little-endian PCM16 bytes.
    pub data: String,
    /// MIME type of the payload, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

/// Encode a capture frame into the wire representation.
pub fn encode_frame(frame: &AudioFrame) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for sample in frame.samples() {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    EncodedChunk {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={}", frame.sample_rate()),
    }
}

/// Decode a base64 PCM16 payload into a frame at the given sample rate.
///
/// The payload must contain whole little-endian 16-bit samples.
pub fn decode_payload(payload: &str, sample_rate: u32) -> DecodeResult<AudioFrame> {
    let bytes = BASE64.decode(payload)?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        samples.push(i16::from_le_bytes([chunk[0], chunk[1]]));
    }

    Ok(AudioFrame::new(samples, sample_rate))
}

/// Convert i16 PCM samples to f32 normalized to [-1, 1].
#[inline]
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 normalized samples to i16 PCM, clamping out-of-range input.
#[inline]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
