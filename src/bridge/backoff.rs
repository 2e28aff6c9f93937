//! Exponential backoff calculator for the initialize readiness loop.
//!
//! Default configuration: 500ms base, factor 1.5, 3s cap, yielding the sequence:
//! 500ms, 750ms, 1125ms, 1687ms, 2531ms, 3000ms, 3000ms...

use std::time::Duration;

/// Exponential backoff calculator.
///
/// # Example
///
/// ```
/// use toolbridge::bridge::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new();
///
/// // First delay is 500ms
/// assert_eq!(backoff.next_delay(), Duration::from_millis(500));
///
/// // Second is 750ms
/// assert_eq!(backoff.next_delay(), Duration::from_millis(750));
/// assert_eq!(backoff.attempt(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Current attempt number (0-indexed)
    attempt: u32,
    /// Base delay (first wait)
    base: Duration,
    /// Growth per attempt
    factor: f64,
    /// Maximum delay cap
    max: Duration,
}

impl Backoff {
    /// Default base delay: 500ms
    const DEFAULT_BASE: Duration = Duration::from_millis(500);
    /// Default growth factor: 1.5
    const DEFAULT_FACTOR: f64 = 1.5;
    /// Default maximum delay: 3 seconds
    const DEFAULT_MAX: Duration = Duration::from_secs(3);

    /// Create a new backoff calculator with default settings.
    pub fn new() -> Self {
        Self::with_config(Self::DEFAULT_BASE, Self::DEFAULT_FACTOR, Self::DEFAULT_MAX)
    }

    /// Create a backoff calculator with custom configuration.
    ///
    /// Factors below 1.0 are clamped to 1.0 so delays never shrink.
    pub fn with_config(base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            max,
        }
    }

    /// Calculate the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Get the current attempt number (0-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Calculate what the current delay would be without incrementing.
    pub fn current_delay(&self) -> Duration {
        // delay = min(base * factor^attempt, max)
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let computed = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let capped = computed.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let backoff = Backoff::new();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.base, Duration::from_millis(500));
        assert_eq!(backoff.factor, 1.5);
        assert_eq!(backoff.max, Duration::from_secs(3));
    }

    #[test]
    fn test_default_sequence() {
        let mut backoff = Backoff::new();

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(750));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1125));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1687));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2531));
        assert_eq!(backoff.next_delay(), Duration::from_millis(3000)); // capped
        assert_eq!(backoff.next_delay(), Duration::from_millis(3000));
    }

    #[test]
    fn test_doubling_config() {
        let mut backoff =
            Backoff::with_config(Duration::from_millis(100), 2.0, Duration::from_millis(500));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500)); // capped
    }

    #[test]
    fn test_shrinking_factor_clamped() {
        let mut backoff =
            Backoff::with_config(Duration::from_millis(100), 0.5, Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_attempt_counts_delays_taken() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        assert_eq!(backoff.current_delay(), Duration::from_millis(1125));
    }

    #[test]
    fn test_current_delay_does_not_increment() {
        let backoff = Backoff::new();
        assert_eq!(backoff.current_delay(), Duration::from_millis(500));
        assert_eq!(backoff.current_delay(), Duration::from_millis(500));
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_non_decreasing_and_bounded() {
        let mut backoff = Backoff::new();
        let mut previous = Duration::ZERO;

        // Run many iterations to ensure no overflow panic
        for _ in 0..1000 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(3));
            previous = delay;
        }
    }
}
