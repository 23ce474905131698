//! Exponential backoff, shared by the Queue Engine's retry delay and the Worker Pool's
//! data-store-failure backoff. Both want the same `min(2^n, cap)` shape with optional jitter;
//! kept here once rather than duplicated per caller.

use rand::Rng;
use std::time::Duration;

/// `delay = min(2^attempt, cap)` seconds. `attempt` is 1-based (the first retry uses
/// `attempt = 1`, giving a 2-second delay).
pub fn exponential_seconds(attempt: u32, cap: Duration) -> Duration {
    let capped_secs = cap.as_secs();
    let secs = 2u64
        .checked_pow(attempt.min(63))
        .unwrap_or(u64::MAX)
        .min(capped_secs.max(1));
    Duration::from_secs(secs)
}

/// Applies up to ±25% jitter to a delay. Used where the operator has opted into jitter;
/// the base delay alone already satisfies the retry-timing property on its own.
pub fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as i64;
    if millis == 0 {
        return delay;
    }
    let jitter_range = millis / 4;
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let jittered = (millis + offset).max(0) as u64;
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_each_attempt_until_cap() {
        let cap = Duration::from_secs(3600);
        assert_eq!(exponential_seconds(1, cap), Duration::from_secs(2));
        assert_eq!(exponential_seconds(2, cap), Duration::from_secs(4));
        assert_eq!(exponential_seconds(3, cap), Duration::from_secs(8));
    }

    #[test]
    fn caps_at_configured_maximum() {
        let cap = Duration::from_secs(30);
        assert_eq!(exponential_seconds(10, cap), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_quarter_of_base() {
        let base = Duration::from_secs(100);
        for _ in 0..50 {
            let jittered = with_jitter(base);
            assert!(jittered.as_millis() as i64 >= 75_000);
            assert!(jittered.as_millis() as i64 <= 125_000);
        }
    }
}
