//! Token bucket state for a single identifier.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, TollgateError};

/// A token bucket that refills continuously at `rate` tokens per second up
/// to `burst` tokens.
///
/// The bucket does not read a clock on its own: every operation takes the
/// instant it should be evaluated at, which keeps the math deterministic.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Maximum number of tokens
    burst: u32,
    /// Tokens available as of `last_update`
    tokens: f64,
    /// When `tokens` was last recomputed
    last_update: DateTime<Utc>,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Fails when `burst` is zero or `rate` is negative or not finite.
    pub fn new(rate: f64, burst: u32, now: DateTime<Utc>) -> Result<Self> {
        if burst < 1 {
            return Err(TollgateError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        if !rate.is_finite() || rate < 0.0 {
            return Err(TollgateError::Config(format!(
                "rate must be a finite, non-negative number, got {}",
                rate
            )));
        }

        Ok(Self::full(rate, burst, now))
    }

    /// Build a full bucket from parameters that were already validated.
    pub(crate) fn full(rate: f64, burst: u32, now: DateTime<Utc>) -> Self {
        debug_assert!(burst >= 1 && rate.is_finite() && rate >= 0.0);
        Self {
            rate,
            burst,
            tokens: burst as f64,
            last_update: now,
        }
    }

    /// Try to take one token at `now`.
    ///
    /// Returns `true` if the event is admitted. A denied event consumes
    /// nothing.
    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        self.advance(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, without changing the bucket.
    pub fn tokens(&self, now: DateTime<Utc>) -> f64 {
        self.refilled(now)
    }

    /// How long until one token is available, evaluated at `now`.
    ///
    /// Returns `None` when the bucket is empty and never refills (`rate == 0`),
    /// or when the rate is so small that the wait does not fit in a `Duration`.
    pub fn next_available(&self, now: DateTime<Utc>) -> Option<Duration> {
        let tokens = self.refilled(now);
        if tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.rate == 0.0 {
            return None;
        }
        Duration::try_from_secs_f64((1.0 - tokens) / self.rate).ok()
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.tokens = self.refilled(now);
        self.last_update = now;
    }

    fn refilled(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = elapsed_secs(self.last_update, now);
        (self.tokens + elapsed * self.rate).clamp(0.0, self.burst as f64)
    }
}

/// Seconds from `from` to `to`, with time going backwards counted as zero.
fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed = to.signed_duration_since(from);
    if elapsed <= chrono::Duration::zero() {
        return 0.0;
    }
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1_000_000_000.0,
        // Only reachable after centuries of idleness; a full refill either way.
        None => elapsed.num_seconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap()
    }

    fn at_millis(ms: i64) -> DateTime<Utc> {
        epoch() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn test_burst_then_deny_at_fixed_time() {
        let mut bucket = TokenBucket::new(1.0, 3, epoch()).unwrap();

        assert!(bucket.allow(epoch()));
        assert!(bucket.allow(epoch()));
        assert!(bucket.allow(epoch()));
        assert!(!bucket.allow(epoch()));
    }

    #[test]
    fn test_refill_sequence_every_220ms() {
        let mut bucket = TokenBucket::new(1.0, 3, epoch()).unwrap();
        let expected = [true, true, true, false, false, true];

        for (i, want) in expected.iter().enumerate() {
            let now = at_millis(i as i64 * 220);
            assert_eq!(bucket.allow(now), *want, "call at {}ms", i * 220);
        }
    }

    #[test]
    fn test_one_token_per_refill_interval() {
        let mut bucket = TokenBucket::new(2.0, 1, epoch()).unwrap();
        assert!(bucket.allow(epoch()));
        assert!(!bucket.allow(epoch()));

        // 1 / rate = 500ms buys exactly one more token.
        assert!(bucket.allow(at_millis(500)));
        assert!(!bucket.allow(at_millis(500)));
        assert!(!bucket.allow(at_millis(900)));
        assert!(bucket.allow(at_millis(1000)));
    }

    #[test]
    fn test_denied_event_consumes_nothing() {
        let mut bucket = TokenBucket::new(1.0, 1, epoch()).unwrap();
        assert!(bucket.allow(epoch()));

        for ms in [100, 200, 300, 400] {
            assert!(!bucket.allow(at_millis(ms)));
        }
        assert!((bucket.tokens(at_millis(400)) - 0.4).abs() < 1e-9);
        assert!(bucket.allow(at_millis(1100)));
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let mut bucket = TokenBucket::new(100.0, 5, epoch()).unwrap();
        assert!(bucket.allow(epoch()));

        let later = at_millis(60_000);
        assert_eq!(bucket.tokens(later), 5.0);
        for _ in 0..5 {
            assert!(bucket.allow(later));
        }
        assert!(!bucket.allow(later));
    }

    #[test]
    fn test_zero_rate_is_fixed_quota() {
        let mut bucket = TokenBucket::new(0.0, 2, epoch()).unwrap();
        assert!(bucket.allow(epoch()));
        assert!(bucket.allow(epoch()));
        assert!(!bucket.allow(at_millis(3_600_000)));
        assert_eq!(bucket.next_available(at_millis(3_600_000)), None);
    }

    #[test]
    fn test_next_available() {
        let mut bucket = TokenBucket::new(4.0, 1, epoch()).unwrap();
        assert_eq!(bucket.next_available(epoch()), Some(Duration::ZERO));

        assert!(bucket.allow(epoch()));
        let wait = bucket.next_available(epoch()).unwrap();
        assert!((wait.as_secs_f64() - 0.25).abs() < 1e-9);

        let wait = bucket.next_available(at_millis(125)).unwrap();
        assert!((wait.as_secs_f64() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_next_available_with_tiny_rate() {
        let mut bucket = TokenBucket::new(1e-300, 1, epoch()).unwrap();
        assert!(bucket.allow(epoch()));
        assert_eq!(bucket.next_available(epoch()), None);
        assert_eq!(bucket.next_available(at_millis(60_000)), None);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut bucket = TokenBucket::new(1.0, 1, at_millis(1000)).unwrap();
        assert!(bucket.allow(at_millis(1000)));
        assert!(!bucket.allow(at_millis(0)));
        assert!(!bucket.allow(at_millis(500)));
        assert!(bucket.allow(at_millis(1500)));
    }

    #[test]
    fn test_no_drift_over_many_small_steps() {
        let mut bucket = TokenBucket::new(1000.0, 10, epoch()).unwrap();
        let mut admitted = 0u32;

        // One call per 100µs for ten seconds: the initial 10 tokens plus
        // 9999.9 refilled ones.
        for step in 0..100_000i64 {
            let now = epoch() + chrono::Duration::microseconds(step * 100);
            if bucket.allow(now) {
                admitted += 1;
            }
        }

        assert!((10_008..=10_010).contains(&admitted), "admitted {}", admitted);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(matches!(
            TokenBucket::new(1.0, 0, epoch()),
            Err(TollgateError::Config(_))
        ));
        assert!(TokenBucket::new(-1.0, 1, epoch()).is_err());
        assert!(TokenBucket::new(f64::NAN, 1, epoch()).is_err());
        assert!(TokenBucket::new(f64::INFINITY, 1, epoch()).is_err());
    }
}
