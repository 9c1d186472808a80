//! Controller and rate limiter configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;
use crate::informer::ListParams;

/// Requeue delay policy selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RateLimiterConfig {
    /// Exponential 5ms..1000s per item, combined with a 10 qps / 100 burst bucket.
    #[default]
    Default,
    /// Per-item exponential backoff.
    Exponential {
        /// Delay after the first failure, in milliseconds.
        base_ms: u64,
        /// Upper bound on the delay, in milliseconds.
        max_ms: u64,
    },
    /// Fast retries for a few attempts, then slow ones.
    FastSlow {
        /// Delay used for the first attempts, in milliseconds.
        fast_ms: u64,
        /// Delay used afterwards, in milliseconds.
        slow_ms: u64,
        /// Number of attempts that use the fast delay.
        max_fast_attempts: u32,
    },
    /// Overall token bucket.
    Bucket {
        /// Refill rate in tokens per second.
        qps: f64,
        /// Bucket capacity.
        burst: u32,
    },
    /// Longest delay among the members.
    MaxOf {
        /// Combined limiters.
        members: Vec<RateLimiterConfig>,
    },
}

impl RateLimiterConfig {
    /// Validate limiter parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero or inverted bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Default => Ok(()),
            Self::Exponential { base_ms, max_ms } => {
                if *base_ms == 0 {
                    return Err(ConfigError::invalid("rate_limiter.base_ms", "must be greater than 0"));
                }
                if max_ms < base_ms {
                    return Err(ConfigError::invalid("rate_limiter.max_ms", "must be >= base_ms"));
                }
                Ok(())
            }
            Self::FastSlow { fast_ms, slow_ms, .. } => {
                if slow_ms < fast_ms {
                    return Err(ConfigError::invalid("rate_limiter.slow_ms", "must be >= fast_ms"));
                }
                Ok(())
            }
            Self::Bucket { qps, burst } => {
                if !qps.is_finite() || *qps <= 0.0 {
                    return Err(ConfigError::invalid("rate_limiter.qps", "must be a positive number"));
                }
                if Duration::try_from_secs_f64(qps.recip()).is_err() {
                    return Err(ConfigError::invalid("rate_limiter.qps", "too small to refill a token"));
                }
                if *burst == 0 {
                    return Err(ConfigError::invalid("rate_limiter.burst", "must be greater than 0"));
                }
                Ok(())
            }
            Self::MaxOf { members } => {
                if members.is_empty() {
                    return Err(ConfigError::invalid("rate_limiter.members", "at least one member required"));
                }
                members.iter().try_for_each(Self::validate)
            }
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller name, used in logs and escalations.
    pub name: String,
    /// Number of worker threads draining the queue.
    pub workers: usize,
    /// Failed attempts tolerated before a key is given up on.
    pub max_retries: u32,
    /// Period of synthetic update events for every cached object. Zero disables resync.
    pub resync_period_ms: u64,
    /// Upper bound on waiting for the initial cache sync.
    pub cache_sync_timeout_ms: u64,
    /// Capacity of the informer event channel.
    pub event_buffer: usize,
    /// How long an idle worker blocks on the queue before re-checking cancellation.
    pub worker_poll_interval_ms: u64,
    /// Time allowed for each worker to exit on shutdown.
    pub shutdown_timeout_ms: u64,
    /// First reconnect delay after a watch failure.
    pub watch_backoff_base_ms: u64,
    /// Maximum reconnect delay after repeated watch failures.
    pub watch_backoff_max_ms: u64,
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Label selector passed verbatim to the client.
    pub label_selector: Option<String>,
    /// Field selector passed verbatim to the client.
    pub field_selector: Option<String>,
    /// Requeue delay policy.
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".into(),
            workers: num_cpus::get(),
            max_retries: 5,
            resync_period_ms: 300_000,
            cache_sync_timeout_ms: 60_000,
            event_buffer: 1024,
            worker_poll_interval_ms: 100,
            shutdown_timeout_ms: 2_000,
            watch_backoff_base_ms: 800,
            watch_backoff_max_ms: 30_000,
            namespace: None,
            label_selector: None,
            field_selector: None,
            rate_limiter: RateLimiterConfig::Default,
        }
    }
}

impl ControllerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the controller name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the retry budget per key.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the resync period.
    #[must_use]
    pub const fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period_ms = duration_ms(period);
        self
    }

    /// Set the cache sync timeout.
    #[must_use]
    pub const fn with_cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the capacity of the informer event channel.
    #[must_use]
    pub const fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    /// Set the idle poll interval used by workers.
    #[must_use]
    pub const fn with_worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set the watch reconnect backoff bounds.
    #[must_use]
    pub const fn with_watch_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.watch_backoff_base_ms = duration_ms(base);
        self.watch_backoff_max_ms = duration_ms(max);
        self
    }

    /// Restrict the watch to one namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the label selector.
    #[must_use]
    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Set the requeue delay policy.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Resync period, or `None` when resync is disabled.
    #[must_use]
    pub const fn resync_period(&self) -> Option<Duration> {
        if self.resync_period_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.resync_period_ms))
        }
    }

    /// Cache sync timeout.
    #[must_use]
    pub const fn cache_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_sync_timeout_ms)
    }

    /// Worker poll interval.
    #[must_use]
    pub const fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    /// Per-worker shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Selector passed to the resource client.
    #[must_use]
    pub fn list_params(&self) -> ListParams {
        ListParams {
            namespace: self.namespace.clone(),
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be greater than 0"));
        }
        if self.cache_sync_timeout_ms == 0 {
            return Err(ConfigError::invalid("cache_sync_timeout_ms", "must be greater than 0"));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::invalid("event_buffer", "must be greater than 0"));
        }
        if self.worker_poll_interval_ms == 0 {
            return Err(ConfigError::invalid("worker_poll_interval_ms", "must be greater than 0"));
        }
        if self.watch_backoff_base_ms == 0 {
            return Err(ConfigError::invalid("watch_backoff_base_ms", "must be greater than 0"));
        }
        if self.watch_backoff_max_ms < self.watch_backoff_base_ms {
            return Err(ConfigError::invalid(
                "watch_backoff_max_ms",
                "must be >= watch_backoff_base_ms",
            ));
        }
        self.rate_limiter.validate()
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `WORKQUEUE_*` environment variables, loading a
    /// `.env` file first when present. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when a variable holds a malformed number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(name) = lookup("WORKQUEUE_NAME") {
            cfg.name = name;
        }
        if let Some(v) = parse_var(&lookup, "WORKQUEUE_WORKERS")? {
            cfg.workers = v;
        }
        if let Some(v) = parse_var(&lookup, "WORKQUEUE_MAX_RETRIES")? {
            cfg.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "WORKQUEUE_RESYNC_PERIOD_MS")? {
            cfg.resync_period_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "WORKQUEUE_CACHE_SYNC_TIMEOUT_MS")? {
            cfg.cache_sync_timeout_ms = v;
        }
        cfg.namespace = lookup("WORKQUEUE_NAMESPACE").or(cfg.namespace);
        cfg.label_selector = lookup("WORKQUEUE_LABEL_SELECTOR").or(cfg.label_selector);
        cfg.field_selector = lookup("WORKQUEUE_FIELD_SELECTOR").or(cfg.field_selector);
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::Parse(format!("{name}={raw}: {e}")))
        })
        .transpose()
}

const fn duration_ms(d: Duration) -> u64 {
    let ms = d.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}
