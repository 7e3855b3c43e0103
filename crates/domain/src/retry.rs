//! Pauses between optimistic-concurrency retries.

use std::time::Duration;

use uuid::Uuid;

/// Conflict retries a service makes before surfacing CONCURRENT_MODIFICATION.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 10;

/// Exponential backoff with jitter, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

impl Backoff {
    /// Longest pause before retry `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// A pause in `[ceiling / 2, ceiling]`, so racing writers spread out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let floor = ceiling / 2;
        let spread = u64::try_from((ceiling - floor).as_micros()).unwrap_or(u64::MAX);
        if spread == 0 {
            return ceiling;
        }
        let roll = Uuid::new_v4().as_u128() as u64;
        floor + Duration::from_micros(roll % (spread + 1))
    }

    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.delay(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_up_to_the_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.ceiling(1), Duration::from_millis(2));
        assert_eq!(backoff.ceiling(2), Duration::from_millis(4));
        assert_eq!(backoff.ceiling(5), Duration::from_millis(32));
        assert_eq!(backoff.ceiling(30), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(u32::MAX), Duration::from_millis(200));
    }

    #[test]
    fn delay_stays_within_half_and_full_ceiling() {
        let backoff = Backoff::default();
        for attempt in 1..12 {
            let ceiling = backoff.ceiling(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= ceiling / 2 && delay <= ceiling, "{delay:?} vs {ceiling:?}");
            }
        }
    }

    #[test]
    fn zero_delay_never_sleeps() {
        let backoff = Backoff {
            initial_delay: Duration::ZERO,
            ..Backoff::default()
        };
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}
