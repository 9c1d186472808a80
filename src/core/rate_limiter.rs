//! Requeue delay policies.
//!
//! A [`RateLimiter`] decides how long a failed key waits before it becomes
//! eligible again. Per-item limiters track a failure count for every key;
//! the bucket limiter throttles overall requeue throughput.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimiterConfig;

/// Decides requeue delays for failing keys.
pub trait RateLimiter: Send + Sync {
    /// Delay before `key` may be processed again. Counts as one failure.
    fn when(&self, key: &str) -> Duration;
    /// Drop any failure history for `key`.
    fn forget(&self, key: &str);
    /// Number of failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &str) -> u32;
}

/// Per-key exponential backoff: `min(base * 2^failures, max)`.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemExponentialFailureRateLimiter {
    /// Create a limiter with the given base and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn backoff(&self, exp: u32) -> Duration {
        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl RateLimiter for ItemExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let exp = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.to_string()).or_insert(0);
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };
        self.backoff(exp)
    }

    fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

/// Retries quickly for a few attempts, then slowly.
#[derive(Debug)]
pub struct ItemFastSlowRateLimiter {
    fast: Duration,
    slow: Duration,
    max_fast_attempts: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ItemFastSlowRateLimiter {
    /// Create a limiter that uses `fast` for the first `max_fast_attempts` failures.
    #[must_use]
    pub fn new(fast: Duration, slow: Duration, max_fast_attempts: u32) -> Self {
        Self {
            fast,
            slow,
            max_fast_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemFastSlowRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        if *count <= self.max_fast_attempts {
            self.fast
        } else {
            self.slow
        }
    }

    fn forget(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket shared by all keys. Never tracks per-key failures.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a bucket refilled at `qps` tokens per second, holding at most `burst`.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = elapsed.mul_add(self.qps, bucket.tokens).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// Combines several limiters, always taking the longest delay.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    /// Combine the given limiters.
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Exponential per-item backoff from 5ms to 1000s combined with an overall
/// 10 qps / 100 burst bucket.
#[must_use]
pub fn default_controller_rate_limiter() -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        )),
        Box::new(BucketRateLimiter::new(10.0, 100)),
    ])
}

/// Build a boxed limiter from configuration.
#[must_use]
pub fn from_config(cfg: &RateLimiterConfig) -> Box<dyn RateLimiter> {
    match cfg {
        RateLimiterConfig::Default => Box::new(default_controller_rate_limiter()),
        RateLimiterConfig::Exponential { base_ms, max_ms } => Box::new(
            ItemExponentialFailureRateLimiter::new(
                Duration::from_millis(*base_ms),
                Duration::from_millis(*max_ms),
            ),
        ),
        RateLimiterConfig::FastSlow {
            fast_ms,
            slow_ms,
            max_fast_attempts,
        } => Box::new(ItemFastSlowRateLimiter::new(
            Duration::from_millis(*fast_ms),
            Duration::from_millis(*slow_ms),
            *max_fast_attempts,
        )),
        RateLimiterConfig::Bucket { qps, burst } => Box::new(BucketRateLimiter::new(*qps, *burst)),
        RateLimiterConfig::MaxOf { members } => {
            Box::new(MaxOfRateLimiter::new(members.iter().map(from_config).collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_until_cap() {
        let limiter = ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
        );
        let delays: Vec<_> = (0..6).map(|_| limiter.when("one")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(8),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ]
        );
        assert_eq!(limiter.num_requeues("one"), 6);

        limiter.forget("one");
        assert_eq!(limiter.num_requeues("one"), 0);
        assert_eq!(limiter.when("one"), Duration::from_millis(1));
    }

    #[test]
    fn test_exponential_backoff_overflow_saturates() {
        let limiter = ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        );
        let mut last = Duration::ZERO;
        for _ in 0..100 {
            let delay = limiter.when("hot");
            assert!(delay >= last);
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(1000));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        limiter.when("a");
        limiter.when("a");
        assert_eq!(limiter.when("b"), Duration::from_millis(1));
        assert_eq!(limiter.num_requeues("a"), 2);
        assert_eq!(limiter.num_requeues("b"), 1);
    }

    #[test]
    fn test_fast_slow() {
        let limiter = ItemFastSlowRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(10),
            3,
        );
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
        assert_eq!(limiter.when("k"), Duration::from_secs(10));
        assert_eq!(limiter.num_requeues("k"), 4);
        limiter.forget("k");
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
    }

    #[test]
    fn test_bucket_allows_burst_then_throttles() {
        let limiter = BucketRateLimiter::new(1.0, 2);
        assert_eq!(limiter.when("a"), Duration::ZERO);
        assert_eq!(limiter.when("b"), Duration::ZERO);
        let delay = limiter.when("c");
        assert!(delay > Duration::from_millis(900), "got {delay:?}");
        assert_eq!(limiter.num_requeues("c"), 0);
    }

    #[test]
    fn test_bucket_delay_saturates_for_tiny_rates() {
        let limiter = BucketRateLimiter::new(1e-300, 1);
        assert_eq!(limiter.when("a"), Duration::ZERO);
        assert_eq!(limiter.when("b"), Duration::MAX);
        assert_eq!(limiter.when("c"), Duration::MAX);
    }

    #[test]
    fn test_max_of_takes_longest() {
        let limiter = MaxOfRateLimiter::new(vec![
            Box::new(ItemExponentialFailureRateLimiter::new(
                Duration::from_millis(1),
                Duration::from_secs(1),
            )),
            Box::new(ItemFastSlowRateLimiter::new(
                Duration::from_millis(3),
                Duration::from_secs(1),
                1,
            )),
        ]);
        assert_eq!(limiter.when("k"), Duration::from_millis(3));
        assert_eq!(limiter.when("k"), Duration::from_secs(1));
        assert_eq!(limiter.num_requeues("k"), 2);
        limiter.forget("k");
        assert_eq!(limiter.num_requeues("k"), 0);
    }

    #[test]
    fn test_default_controller_rate_limiter_starts_at_base() {
        let limiter = default_controller_rate_limiter();
        assert_eq!(limiter.when("fresh"), Duration::from_millis(5));
        assert_eq!(limiter.when("fresh"), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues("fresh"), 2);
    }

    #[test]
    fn test_from_config_exponential() {
        let limiter = from_config(&RateLimiterConfig::Exponential {
            base_ms: 2,
            max_ms: 3,
        });
        assert_eq!(limiter.when("k"), Duration::from_millis(2));
        assert_eq!(limiter.when("k"), Duration::from_millis(3));
    }
}
