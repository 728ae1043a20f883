//! Simple stopwatch for measuring request latency.

use std::time::Duration;
use tokio::time::Instant;

/// A lightweight stopwatch based on the monotonic clock.
///
/// Uses tokio's clock so that paused test runtimes can control elapsed time.
#[derive(Clone, Copy, Debug)]
pub struct Watch {
    start: Instant,
}

impl Watch {
    /// Starts a new stopwatch.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in fractional milliseconds since the watch was started.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn measures_elapsed_time() {
        let watch = Watch::start();
        tokio::time::advance(Duration::from_micros(12_300)).await;

        assert!((watch.elapsed_ms() - 12.3).abs() < 1e-9, "elapsed was {} ms", watch.elapsed_ms());
    }
}
