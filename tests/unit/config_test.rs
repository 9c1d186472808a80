//! Tests for configuration parsing and validation

use prometheus_workqueue::config::{ControllerConfig, RateLimiterConfig};
use prometheus_workqueue::core::ConfigError;
use std::time::Duration;

#[test]
fn test_default_config_is_valid() {
    let cfg = ControllerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_retries, 5);
    assert!(cfg.workers >= 1);
    assert_eq!(cfg.rate_limiter, RateLimiterConfig::Default);
    assert_eq!(cfg.resync_period(), Some(Duration::from_secs(300)));
}

#[test]
fn test_zero_resync_disables_resync() {
    let cfg = ControllerConfig::default().with_resync_period(Duration::ZERO);
    assert_eq!(cfg.resync_period(), None);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_from_json_with_nested_rate_limiter() {
    let cfg = ControllerConfig::from_json_str(
        r#"{
            "name": "configmaps",
            "workers": 3,
            "namespace": "default",
            "label_selector": "app=web",
            "rate_limiter": {
                "kind": "max_of",
                "members": [
                    { "kind": "exponential", "base_ms": 5, "max_ms": 1000000 },
                    { "kind": "bucket", "qps": 10.0, "burst": 100 }
                ]
            }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.name, "configmaps");
    assert_eq!(cfg.workers, 3);
    assert_eq!(cfg.max_retries, 5, "unset fields keep defaults");
    let params = cfg.list_params();
    assert_eq!(params.namespace.as_deref(), Some("default"));
    assert_eq!(params.label_selector.as_deref(), Some("app=web"));
    assert!(matches!(cfg.rate_limiter, RateLimiterConfig::MaxOf { ref members } if members.len() == 2));
}

#[test]
fn test_from_json_rejects_malformed_input() {
    let err = ControllerConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_json_rejects_invalid_values() {
    let err = ControllerConfig::from_json_str(r#"{ "workers": 0 }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "workers", .. }));
}

#[test]
fn test_rate_limiter_validation() {
    let cases = [
        RateLimiterConfig::Exponential { base_ms: 0, max_ms: 10 },
        RateLimiterConfig::Exponential { base_ms: 10, max_ms: 5 },
        RateLimiterConfig::FastSlow { fast_ms: 100, slow_ms: 10, max_fast_attempts: 3 },
        RateLimiterConfig::Bucket { qps: 0.0, burst: 1 },
        RateLimiterConfig::Bucket { qps: f64::NAN, burst: 1 },
        RateLimiterConfig::Bucket { qps: 1e-300, burst: 1 },
        RateLimiterConfig::Bucket { qps: 1.0, burst: 0 },
        RateLimiterConfig::MaxOf { members: vec![] },
        RateLimiterConfig::MaxOf {
            members: vec![RateLimiterConfig::Bucket { qps: 1.0, burst: 0 }],
        },
    ];
    for case in cases {
        assert!(case.validate().is_err(), "{case:?} should be rejected");
    }
}

#[test]
fn test_slow_but_usable_bucket_is_accepted() {
    let cfg = RateLimiterConfig::Bucket { qps: 0.001, burst: 1 };
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_invalid_rate_limiter_fails_controller_validation() {
    let cfg = ControllerConfig::default()
        .with_rate_limiter(RateLimiterConfig::Bucket { qps: -1.0, burst: 10 });
    assert!(cfg.validate().is_err());
}

#[test]
fn test_watch_backoff_bounds_are_checked() {
    let cfg = ControllerConfig::default()
        .with_watch_backoff(Duration::from_secs(10), Duration::from_secs(1));
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Invalid { field: "watch_backoff_max_ms", .. })
    ));
}
