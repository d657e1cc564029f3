//! Randomized pre-sell delay with a cancellable progress countdown.

use crate::trading::EngineEvent;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Countdown resolution; progress is reported once per tick.
const TICK: Duration = Duration::from_millis(100);

/// Samples and runs the randomized delay before a volume-mode sell.
#[derive(Debug, Clone)]
pub struct DelayScheduler {
    min: Duration,
    max: Duration,
}

impl DelayScheduler {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min_secs.max(0.0)),
            max: Duration::from_secs_f64(max_secs.max(min_secs.max(0.0))),
        }
    }

    /// Draw a uniform random delay in `[min, max]`.
    pub fn sample_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Count `delay` down in fixed ticks, reporting the remainder after each
    /// tick. Purely for user feedback; returns early (between ticks) when
    /// the stop flag is raised, leaving no background work behind.
    pub async fn countdown(
        delay: Duration,
        stop: Arc<AtomicBool>,
        events: mpsc::Sender<EngineEvent>,
    ) {
        let mut remaining = delay;
        debug!(secs = remaining.as_secs_f64(), "Starting pre-sell countdown");

        while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
            tokio::time::sleep(TICK.min(remaining)).await;
            remaining = remaining.saturating_sub(TICK);
            let _ = events
                .send(EngineEvent::DelayTick {
                    remaining_secs: remaining.as_secs_f64(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_within_bounds() {
        let scheduler = DelayScheduler::new(5.0, 30.0);
        for _ in 0..100 {
            let delay = scheduler.sample_delay();
            assert!(delay >= Duration::from_secs_f64(5.0));
            assert!(delay <= Duration::from_secs_f64(30.0));
        }
    }

    #[test]
    fn test_degenerate_range_returns_min() {
        let scheduler = DelayScheduler::new(10.0, 10.0);
        assert_eq!(scheduler.sample_delay(), Duration::from_secs_f64(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_to_zero() {
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));

        DelayScheduler::countdown(Duration::from_millis(300), stop, tx).await;

        let mut last = f64::MAX;
        let mut ticks = 0;
        while let Ok(EngineEvent::DelayTick { remaining_secs }) = rx.try_recv() {
            assert!(remaining_secs <= last);
            last = remaining_secs;
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(last, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_stops_on_signal() {
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(true));

        // Stop raised before the first tick boundary: at most one tick runs.
        DelayScheduler::countdown(Duration::from_secs(60), stop, tx).await;

        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert!(ticks <= 1);
    }
}
