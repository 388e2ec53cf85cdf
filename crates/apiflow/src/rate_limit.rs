//! Fixed-interval dispatch pacing.

use apiflow_core::WorkflowError;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const MIN_PERIOD: Duration = Duration::from_nanos(1);

/// Paces step dispatch to at most `rate` steps per second.
///
/// The first permit is granted immediately; each further permit waits for the
/// next tick. One limiter is shared by every dispatch of a workflow run.
#[derive(Debug)]
pub struct RateLimiter {
    ticker: Interval,
    period: Duration,
}

impl RateLimiter {
    /// Creates a limiter for `rate` steps per second, or `None` when `rate`
    /// is 0 (unbounded).
    pub fn per_second(rate: u32) -> Option<Self> {
        if rate == 0 {
            return None;
        }
        // rates above one per nanosecond round down to a zero period
        let period = (Duration::from_secs(1) / rate).max(MIN_PERIOD);
        let mut ticker = interval(period);
        // After an idle stretch, resume pacing instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(Self { ticker, period })
    }

    /// Returns the interval between permits.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next permit.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
            _ = self.ticker.tick() => Ok(()),
        }
    }
}
