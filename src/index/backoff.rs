//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculates the delay before retry number `attempt` (starting at 1).
///
/// The delay doubles with every attempt starting at `base`, is capped at `max` and gets up to
/// 10% of random jitter added.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::rng().random_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(1000);

    #[test]
    fn doubles_per_attempt() {
        let first = calculate_backoff(1, BASE, MAX);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(110));

        let second = calculate_backoff(2, BASE, MAX);
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(220));
    }

    #[test]
    fn is_capped_at_the_maximum() {
        let delay = calculate_backoff(30, BASE, MAX);
        assert!(delay >= MAX && delay < Duration::from_millis(1100));
    }

    #[test]
    fn attempt_zero_does_not_wait() {
        assert_eq!(calculate_backoff(0, BASE, MAX), Duration::ZERO);
    }
}
