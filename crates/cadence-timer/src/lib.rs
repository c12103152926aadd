//! Tokio-backed [`TimerEngine`] for the Cadence scheduler.
//!
//! Each armed timer is a spawned task tracked in a concurrent map keyed by
//! its handle. Cancellation and firing race on removing the map entry, and
//! whichever side wins decides the outcome: a one-shot callback therefore
//! runs at most once, and `cancel` reports pending-ness exactly. Works under
//! tokio's paused test clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::trace;

use cadence_scheduler::{TimerCallback, TimerEngine, TimerError, TimerHandle};

/// Timer engine backed by `tokio::time`.
///
/// Cheap to clone via [`Arc`]; all timers share one handle namespace.
pub struct TokioTimerEngine {
    next_id: AtomicU64,
    /// Live timers. The slot holds `None` for the instant between spawning
    /// the task and recording its join handle.
    timers: Arc<DashMap<u64, Option<JoinHandle<()>>>>,
}

impl TokioTimerEngine {
    /// Create an engine with no armed timers.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Number of currently armed timers.
    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record the join handle for `id` unless the timer already fired or
    /// was canceled while we were spawning it.
    fn attach(&self, id: u64, join: JoinHandle<()>) {
        if let Entry::Occupied(mut entry) = self.timers.entry(id) {
            entry.insert(Some(join));
        }
    }
}

impl Default for TokioTimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimerEngine for TokioTimerEngine {
    async fn arm(
        &self,
        delay: Duration,
        on_fire: TimerCallback,
    ) -> Result<TimerHandle, TimerError> {
        let id = self.mint();
        // Register before spawning so a zero-delay task cannot observe a
        // missing entry and skip its own firing.
        self.timers.insert(id, None);

        let timers = Arc::clone(&self.timers);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Winning this removal against a concurrent cancel is what makes
            // the callback fire at most once.
            if timers.remove(&id).is_some() {
                trace!(timer_id = id, "one-shot timer fired");
                on_fire().await;
            }
        });

        self.attach(id, join);
        trace!(timer_id = id, delay_ms = delay.as_millis() as u64, "armed one-shot timer");
        Ok(TimerHandle(id))
    }

    async fn arm_periodic(
        &self,
        interval: Duration,
        on_fire: TimerCallback,
    ) -> Result<TimerHandle, TimerError> {
        if interval.is_zero() {
            return Err(TimerError::ArmFailed(
                "periodic interval must be non-zero".to_string(),
            ));
        }

        let id = self.mint();
        self.timers.insert(id, None);

        let timers = Arc::clone(&self.timers);
        let join = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                if !timers.contains_key(&id) {
                    break;
                }
                trace!(timer_id = id, "periodic timer fired");
                on_fire().await;
            }
        });

        self.attach(id, join);
        trace!(
            timer_id = id,
            interval_ms = interval.as_millis() as u64,
            "armed periodic timer"
        );
        Ok(TimerHandle(id))
    }

    async fn cancel(&self, handle: TimerHandle) -> bool {
        match self.timers.remove(&handle.0) {
            Some((_, slot)) => {
                if let Some(join) = slot {
                    join.abort();
                }
                trace!(timer_id = handle.0, "canceled pending timer");
                true
            }
            None => {
                trace!(timer_id = handle.0, "cancel of absent timer");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::advance;

    fn counting_callback() -> (Arc<AtomicUsize>, TimerCallback) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let callback: TimerCallback = Box::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (fired, callback)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once_after_delay() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        engine
            .arm(Duration::from_millis(100), callback)
            .await
            .unwrap();
        // Let the timer task register its sleep before moving the clock.
        tokio::task::yield_now().await;

        advance(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Never fires again
        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.armed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_immediately() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        engine.arm(Duration::ZERO, callback).await.unwrap();

        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_returns_true_and_suppresses_fire() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        let handle = engine
            .arm(Duration::from_secs(60), callback)
            .await
            .unwrap();

        assert!(engine.cancel(handle).await);
        assert_eq!(engine.armed(), 0);

        advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_returns_false() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        let handle = engine
            .arm(Duration::from_millis(10), callback)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(!engine.cancel(handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_twice_returns_false_second_time() {
        let engine = TokioTimerEngine::new();
        let (_, callback) = counting_callback();

        let handle = engine
            .arm(Duration::from_secs(5), callback)
            .await
            .unwrap();

        assert!(engine.cancel(handle).await);
        assert!(!engine.cancel(handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_repeatedly() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        engine
            .arm_periodic(Duration::from_secs(1), callback)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        for expected in 1..=3 {
            advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
            assert_eq!(fired.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_stops_after_cancel() {
        let engine = TokioTimerEngine::new();
        let (fired, callback) = counting_callback();

        let handle = engine
            .arm_periodic(Duration::from_secs(1), callback)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        assert!(engine.cancel(handle).await);
        advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() {
        let engine = TokioTimerEngine::new();
        let (_, callback) = counting_callback();

        let result = engine.arm_periodic(Duration::ZERO, callback).await;
        assert!(matches!(result, Err(TimerError::ArmFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_are_distinct() {
        let engine = TokioTimerEngine::new();
        let (_, a) = counting_callback();
        let (_, b) = counting_callback();

        let ha = engine.arm(Duration::from_secs(1), a).await.unwrap();
        let hb = engine.arm(Duration::from_secs(1), b).await.unwrap();
        assert_ne!(ha, hb);
        assert_eq!(engine.armed(), 2);
    }
}
