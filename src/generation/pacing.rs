//! Waiting between provider calls.

use std::time::Duration;

use async_trait::async_trait;

/// Suspends the current task. Swapped for a recorder in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, via tokio's timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Admission control for a batch of sequential generations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pacing {
    /// No waiting between calls
    Unpaced,
    /// The same gap before every call but the first
    FixedInterval(Duration),
}

impl Pacing {
    /// How long to wait before the call at `index` (zero based), if at all.
    pub fn delay_before(&self, index: usize) -> Option<Duration> {
        match self {
            Self::Unpaced => None,
            Self::FixedInterval(_) if index == 0 => None,
            Self::FixedInterval(interval) if interval.is_zero() => None,
            Self::FixedInterval(interval) => Some(*interval),
        }
    }
}
