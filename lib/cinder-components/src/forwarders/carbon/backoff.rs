use std::time::Duration;

/// An exponential backoff strategy for dial attempts.
///
/// The backoff duration doubles with every consecutive failure, starting at the minimum backoff for the first failure,
/// and is clamped to the maximum backoff.
#[derive(Clone, Debug)]
pub struct DialBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
}

impl DialBackoff {
    /// Creates a new `DialBackoff` with the given minimum and maximum backoff durations.
    ///
    /// If the maximum is smaller than the minimum, the minimum is used for both.
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    /// Calculates the backoff duration after the given number of consecutive failures.
    ///
    /// Zero failures means no backoff at all.
    pub fn get_backoff_duration(&self, failure_count: u32) -> Duration {
        if failure_count == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(failure_count - 1);
        self.min_backoff
            .saturating_mul(factor)
            .clamp(self.min_backoff, self.max_backoff)
    }
}
