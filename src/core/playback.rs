//! Gapless playback scheduling.
//!
//! [`PlaybackScheduler`] owns the monotonic playback clock and the set of
//! currently scheduled sources. Buffers are scheduled back-to-back in
//! arrival order with no silence gap and no overlap; interruption stops
//! everything synchronously and resets the clock so the next buffer starts
//! immediately instead of at a stale future offset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::codec::AudioFrame;

/// Monotonic clock the scheduler measures against.
///
/// The production clock is tokio-time based so tests can drive it with
/// virtual time; nothing else in the engine reads it.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock anchored at its creation instant.
pub struct AudioClock {
    origin: tokio::time::Instant,
}

impl AudioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for AudioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Output seam for scheduled audio.
///
/// `begin` receives buffers in playback order, already spaced gaplessly by
/// the scheduler; `halt` must drop everything queued or playing immediately.
pub trait PlaybackSink: Send + Sync {
    fn begin(&self, frame: &AudioFrame);
    fn halt(&self);
}

/// Sink that discards audio. Used when no output device is wired up.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn begin(&self, _frame: &AudioFrame) {}
    fn halt(&self) {}
}

/// One scheduled buffer: the decoded samples plus the start time the
/// scheduler assigned on the playback clock.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub frame: AudioFrame,
    pub start: Duration,
    pub id: u64,
}

struct SchedulerInner {
    next_start: Duration,
    /// Active source id -> scheduled end time.
    active: HashMap<u64, Duration>,
    next_id: u64,
    /// Bumped on interrupt; end timers from an older epoch are stale.
    epoch: u64,
}

struct Shared {
    clock: Arc<dyn PlaybackClock>,
    sink: Arc<dyn PlaybackSink>,
    inner: Mutex<SchedulerInner>,
    speaking_tx: watch::Sender<bool>,
}

/// Gapless scheduler over one playback sink.
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn PlaybackClock>, sink: Arc<dyn PlaybackSink>) -> Self {
        let (speaking_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                clock,
                sink,
                inner: Mutex::new(SchedulerInner {
                    next_start: Duration::ZERO,
                    active: HashMap::new(),
                    next_id: 0,
                    epoch: 0,
                }),
                speaking_tx,
            }),
        }
    }

    /// Schedule a decoded buffer for gapless playback.
    ///
    /// The buffer starts at `max(next_start, now)`: consecutive in-order
    /// buffers neither overlap nor leave a gap, and a burst arriving after
    /// idle time starts immediately instead of stacking delay behind a
    /// `next_start` that is already in the past.
    pub fn enqueue(&self, frame: AudioFrame) -> PlaybackItem {
        let shared = &self.shared;
        let (item, end, epoch) = {
            let mut inner = shared.inner.lock();
            let now = shared.clock.now();
            let start = inner.next_start.max(now);
            let end = start + frame.duration();
            inner.next_start = end;

            let id = inner.next_id;
            inner.next_id += 1;
            inner.active.insert(id, end);

            shared.speaking_tx.send_replace(true);
            (PlaybackItem { frame, start, id }, end, inner.epoch)
        };

        shared.sink.begin(&item.frame);

        debug!(
            id = item.id,
            start_ms = item.start.as_millis() as u64,
            duration_ms = item.frame.duration().as_millis() as u64,
            "scheduled playback buffer"
        );

        // Natural-end timer: speaking drops to false exactly when the last
        // active source runs out, unless an interrupt got there first.
        let timer_shared = Arc::clone(shared);
        let item_id = item.id;
        tokio::spawn(async move {
            let remaining = end.saturating_sub(timer_shared.clock.now());
            tokio::time::sleep(remaining).await;
            Self::finish_source(&timer_shared, item_id, epoch);
        });

        item
    }

    fn finish_source(shared: &Shared, id: u64, epoch: u64) {
        let mut inner = shared.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        if inner.active.remove(&id).is_some() && inner.active.is_empty() {
            shared.speaking_tx.send_replace(false);
        }
    }

    /// Stop every scheduled and playing source immediately.
    ///
    /// Clears the active set, resets `next_start` to the current clock time
    /// and lowers the speaking flag, all synchronously before returning.
    pub fn interrupt(&self) {
        let shared = &self.shared;
        {
            let mut inner = shared.inner.lock();
            let dropped = inner.active.len();
            inner.active.clear();
            inner.epoch += 1;
            inner.next_start = shared.clock.now();
            if dropped > 0 {
                debug!(dropped, "playback interrupted");
            }
            shared.speaking_tx.send_replace(false);
        }
        shared.sink.halt();
    }

    /// Whether any source is currently scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        *self.shared.speaking_tx.borrow()
    }

    /// Subscribe to speaking-flag transitions.
    pub fn speaking_changes(&self) -> watch::Receiver<bool> {
        self.shared.speaking_tx.subscribe()
    }

    /// Number of active sources; diagnostics only.
    pub fn active_sources(&self) -> usize {
        self.shared.inner.lock().active.len()
    }

    /// The clock this scheduler schedules against.
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::OUTPUT_SAMPLE_RATE;

    fn frame_of(secs: f64) -> AudioFrame {
        let samples = (secs * OUTPUT_SAMPLE_RATE as f64).round() as usize;
        AudioFrame::new(vec![0i16; samples], OUTPUT_SAMPLE_RATE)
    }

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(Arc::new(AudioClock::new()), Arc::new(NullSink))
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffers_schedule_back_to_back() {
        let scheduler = scheduler();

        let durations = [0.5, 0.3, 0.2, 0.25];
        let mut items = Vec::new();
        for &d in &durations {
            items.push(scheduler.enqueue(frame_of(d)));
        }

        for pair in items.windows(2) {
            let end = pair[0].start + pair[0].frame.duration();
            assert_eq!(
                pair[1].start, end,
                "buffer {} must start exactly when buffer {} ends",
                pair[1].id, pair[0].id
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlap_and_no_start_in_the_past() {
        let scheduler = scheduler();

        let mut last_end = Duration::ZERO;
        for _ in 0..5 {
            let item = scheduler.enqueue(frame_of(0.1));
            assert!(item.start >= last_end, "overlap detected");
            assert!(item.start >= Duration::ZERO);
            last_end = item.start + item.frame.duration();
            tokio::time::advance(Duration::from_millis(30)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_idle_catches_up_to_now() {
        let scheduler = scheduler();

        let first = scheduler.enqueue(frame_of(0.2));
        assert_eq!(first.start, Duration::ZERO);

        // Let the queue drain and real time move past next_start.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let second = scheduler.enqueue(frame_of(0.2));
        assert!(
            second.start >= Duration::from_secs(3),
            "stale next_start must not schedule into the past: {:?}",
            second.start
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_drops_at_natural_end() {
        let scheduler = scheduler();
        assert!(!scheduler.is_speaking());

        scheduler.enqueue(frame_of(0.5));
        scheduler.enqueue(frame_of(0.3));
        assert!(scheduler.is_speaking());

        // Halfway through: still speaking.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(scheduler.is_speaking());

        // Past the combined 0.8s span: both sources ended naturally.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.active_sources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_clears_synchronously_and_resets_clock() {
        let scheduler = scheduler();

        scheduler.enqueue(frame_of(1.0));
        scheduler.enqueue(frame_of(1.0));
        assert!(scheduler.is_speaking());

        tokio::time::advance(Duration::from_millis(100)).await;
        scheduler.interrupt();

        // Synchronous effects, no await in between.
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.active_sources(), 0);

        // The next enqueue starts now, not after the stale 2s backlog.
        let item = scheduler.enqueue(frame_of(0.2));
        assert_eq!(item.start, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_end_timer_does_not_clear_new_sources() {
        let scheduler = scheduler();

        scheduler.enqueue(frame_of(0.2));
        scheduler.interrupt();

        // New source enqueued after the interrupt; the first buffer's end
        // timer (now stale) fires during its playback.
        scheduler.enqueue(frame_of(1.0));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(
            scheduler.is_speaking(),
            "stale timer from before the interrupt cleared a live source"
        );

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!scheduler.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_chunk_scenario_spans_one_second() {
        let scheduler = scheduler();

        // 0.5s, 0.3s, 0.2s chunks arriving out of sync with capture ticks.
        let a = scheduler.enqueue(frame_of(0.5));
        tokio::time::advance(Duration::from_millis(120)).await;
        let b = scheduler.enqueue(frame_of(0.3));
        tokio::time::advance(Duration::from_millis(260)).await;
        let c = scheduler.enqueue(frame_of(0.2));

        let span = (c.start + c.frame.duration()) - a.start;
        assert_eq!(span, Duration::from_secs(1));
        assert_eq!(b.start, a.start + a.frame.duration());
        assert_eq!(c.start, b.start + b.frame.duration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_receives_buffers_and_halt() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSink {
            begun: AtomicUsize,
            halted: AtomicUsize,
        }
        impl PlaybackSink for CountingSink {
            fn begin(&self, _frame: &AudioFrame) {
                self.begun.fetch_add(1, Ordering::SeqCst);
            }
            fn halt(&self) {
                self.halted.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sink = Arc::new(CountingSink {
            begun: AtomicUsize::new(0),
            halted: AtomicUsize::new(0),
        });
        let scheduler = PlaybackScheduler::new(Arc::new(AudioClock::new()), sink.clone());

        scheduler.enqueue(frame_of(0.1));
        scheduler.enqueue(frame_of(0.1));
        scheduler.interrupt();

        assert_eq!(sink.begun.load(Ordering::SeqCst), 2);
        assert_eq!(sink.halted.load(Ordering::SeqCst), 1);
    }
}
