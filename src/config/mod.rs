//! Engine configuration.
//!
//! All tunables of the audio pipeline in one place: sample rates and frame
//! sizes, the analyzer window, the session voice/persona, collaborator
//! endpoints, and the clip vocabulary preloaded at startup. Values come
//! from [`Default`] or from the environment via [`EngineConfig::from_env`].

mod env;

use crate::core::codec::{CAPTURE_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capture sample rate in Hz.
    pub input_sample_rate: u32,
    /// Response/synthesis sample rate in Hz.
    pub output_sample_rate: u32,
    /// Samples per capture frame (the encoder block size).
    pub frame_samples: usize,
    /// Analyzer FFT window size in samples; must be a power of two.
    pub fft_size: usize,
    /// Synthetic voice used for the live session and the clip cache.
    pub voice: String,
    /// Persona text applied to the live conversation.
    pub system_instruction: String,
    /// WebSocket endpoint of the live conversational collaborator.
    pub live_url: String,
    /// HTTP endpoint of the one-shot synthesis collaborator.
    pub synth_url: String,
    /// Bearer token for the synthesis endpoint, if required.
    pub api_key: Option<String>,
    /// Clip vocabulary preloaded at startup, in order.
    pub preload_phrases: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_samples: CAPTURE_FRAME_SAMPLES,
            fft_size: 2048,
            voice: "aoede".to_string(),
            system_instruction: "You are a friendly, concise voice companion. Keep spoken \
                                 answers short and conversational."
                .to_string(),
            live_url: "ws://127.0.0.1:8900/live".to_string(),
            synth_url: "http://127.0.0.1:8900/synthesize".to_string(),
            api_key: None,
            preload_phrases: vec![
                "Welcome back.".to_string(),
                "I'm listening.".to_string(),
                "One moment.".to_string(),
                "Goodbye for now.".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// Check invariants that would otherwise surface as runtime faults deep
    /// inside the pipeline.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: "sample rates must be non-zero".into(),
            });
        }
        if self.frame_samples == 0 {
            return Err(ConfigError::Invalid {
                field: "frame_samples",
                reason: "capture frames cannot be empty".into(),
            });
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(ConfigError::Invalid {
                field: "fft_size",
                reason: format!("{} is not a power of two >= 32", self.fft_size),
            });
        }
        if self.voice.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "voice",
                reason: "a voice name is required".into(),
            });
        }
        Ok(())
    }
}
