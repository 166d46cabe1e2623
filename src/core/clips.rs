//! Pre-synthesized voice clip cache.
//!
//! [`ClipCache`] keeps a small, fixed vocabulary of short voice lines
//! decoded and ready to play. Population runs as a best-effort sequential
//! preload at startup; lookup is synchronous; a miss falls back to one-shot
//! synthesis and backfills the cache. Entries are write-once and live for
//! the whole application session. Clips are short declarative cues, so only
//! one may play at a time and concurrent requests are rejected, not queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::codec::{self, AudioFrame, DecodeError, OUTPUT_SAMPLE_RATE};
use super::playback::PlaybackSink;
use super::synth::{SpeechSynthesizer, SynthesisError};

/// Errors from clip operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClipError {
    /// Another clip is currently playing; requests are not queued.
    #[error("another clip is already playing")]
    Busy,

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A concurrent load of the same key failed in the loading caller.
    #[error("clip \"{0}\" is unavailable")]
    Unavailable(String),
}

/// Result type for clip operations.
pub type ClipResult<T> = Result<T, ClipError>;

/// Keyed store of decoded, ready-to-play voice clips.
///
/// The cache plays through its own sink so its playback can never disturb
/// the live session's scheduling clock.
pub struct ClipCache {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn PlaybackSink>,
    voice: String,
    entries: RwLock<HashMap<String, AudioFrame>>,
    /// Keys with a synthesis in flight; waiters park on the watch channel
    /// so a key is synthesized at most once.
    inflight: Mutex<HashMap<String, watch::Receiver<bool>>>,
    playing: Arc<AtomicBool>,
}

impl ClipCache {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn PlaybackSink>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            voice: voice.into(),
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of clips currently decoded and resident.
    pub fn loaded_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether a clip is present without triggering synthesis.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Whether a clip is currently playing.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Sequentially synthesize and cache every missing key.
    ///
    /// Runs one request at a time to bound peak synthesis load. A failed
    /// key is logged and skipped; the rest of the list still loads. Returns
    /// the number of clips resident afterwards.
    pub async fn preload(&self, keys: &[String]) -> usize {
        for key in keys {
            match self.ensure(key).await {
                Ok(_) => {
                    debug!(loaded = self.loaded_count(), clip = %key, "clip preloaded");
                }
                Err(e) => {
                    warn!(clip = %key, "clip preload failed, continuing: {e}");
                }
            }
        }

        let loaded = self.loaded_count();
        info!(loaded, requested = keys.len(), "clip preload finished");
        loaded
    }

    /// Play the clip for `key`.
    ///
    /// A cached clip starts immediately; a miss synthesizes on demand,
    /// backfills the cache for next time, then plays. While another clip is
    /// active the request is rejected with [`ClipError::Busy`].
    pub async fn play(&self, key: &str) -> ClipResult<()> {
        if self.playing.swap(true, Ordering::AcqRel) {
            return Err(ClipError::Busy);
        }

        let frame = match self.ensure(key).await {
            Ok(frame) => frame,
            Err(e) => {
                // A failed fallback must not leave the playing flag stuck.
                self.playing.store(false, Ordering::Release);
                return Err(e);
            }
        };

        debug!(clip = %key, duration_ms = frame.duration().as_millis() as u64, "playing clip");
        self.sink.begin(&frame);

        let duration = frame.duration();
        let playing = Arc::clone(&self.playing);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            playing.store(false, Ordering::Release);
        });

        Ok(())
    }

    /// Fetch the decoded clip for `key`, synthesizing it if absent.
    ///
    /// Entries are write-once: concurrent calls for the same key perform
    /// exactly one synthesis, and a completion against an existing entry is
    /// a no-op.
    async fn ensure(&self, key: &str) -> ClipResult<AudioFrame> {
        if let Some(frame) = self.entries.read().get(key) {
            return Ok(frame.clone());
        }

        // Claim the key or join an in-flight load.
        let claim = {
            let mut inflight = self.inflight.lock();
            if let Some(frame) = self.entries.read().get(key) {
                return Ok(frame.clone());
            }
            match inflight.get(key) {
                Some(done) => Err(done.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    inflight.insert(key.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        let done_tx = match claim {
            Ok(tx) => tx,
            Err(mut done) => {
                // Another caller is loading this key; wait it out.
                loop {
                    if *done.borrow() {
                        break;
                    }
                    if done.changed().await.is_err() {
                        break;
                    }
                }
                return self
                    .entries
                    .read()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ClipError::Unavailable(key.to_string()));
            }
        };

        let result = self.synthesize_clip(key).await;

        self.inflight.lock().remove(key);
        done_tx.send_replace(true);

        result
    }

    async fn synthesize_clip(&self, key: &str) -> ClipResult<AudioFrame> {
        let payload = self.synthesizer.synthesize(key, &self.voice).await?;
        let frame = codec::decode_payload(&payload, OUTPUT_SAMPLE_RATE)?;

        let mut entries = self.entries.write();
        // Write-once: never overwrite an entry another path already stored.
        let stored = entries
            .entry(key.to_string())
            .or_insert_with(|| frame.clone());
        Ok(stored.clone())
    }
}
