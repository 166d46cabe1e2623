use std::env;

use super::{ConfigError, ConfigResult, EngineConfig};

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads overrides on top of the defaults, loading a `.env` file first
    /// if one is present. Malformed values are reported, never silently
    /// defaulted.
    ///
    /// Recognized variables:
    /// - `VOXA_LIVE_URL`, `VOXA_SYNTH_URL`, `VOXA_API_KEY`
    /// - `VOXA_VOICE`, `VOXA_SYSTEM_INSTRUCTION`
    /// - `VOXA_FRAME_SAMPLES`, `VOXA_FFT_SIZE`
    /// - `VOXA_PRELOAD` (comma-separated phrase list)
    pub fn from_env() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = EngineConfig::default();

        if let Ok(url) = env::var("VOXA_LIVE_URL") {
            config.live_url = url;
        }
        if let Ok(url) = env::var("VOXA_SYNTH_URL") {
            config.synth_url = url;
        }
        config.api_key = env::var("VOXA_API_KEY").ok();

        if let Ok(voice) = env::var("VOXA_VOICE") {
            config.voice = voice;
        }
        if let Ok(instruction) = env::var("VOXA_SYSTEM_INSTRUCTION") {
            config.system_instruction = instruction;
        }

        if let Ok(value) = env::var("VOXA_FRAME_SAMPLES") {
            config.frame_samples = value.parse().map_err(|e| ConfigError::Invalid {
                field: "frame_samples",
                reason: format!("VOXA_FRAME_SAMPLES: {e}"),
            })?;
        }
        if let Ok(value) = env::var("VOXA_FFT_SIZE") {
            config.fft_size = value.parse().map_err(|e| ConfigError::Invalid {
                field: "fft_size",
                reason: format!("VOXA_FFT_SIZE: {e}"),
            })?;
        }

        if let Ok(value) = env::var("VOXA_PRELOAD") {
            config.preload_phrases = value
                .split(',')
                .map(|phrase| phrase.trim().to_string())
                .filter(|phrase| !phrase.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }
}
