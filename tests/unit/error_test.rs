//! Tests for error types

use prometheus_workqueue::core::{
    ClientError, ConfigError, ControllerError, InformerError, KeyError,
};
use std::error::Error;
use std::time::Duration;

#[test]
fn test_error_display() {
    assert!(KeyError::MissingName.to_string().contains("name"));
    assert!(KeyError::InvalidFormat("a/b/c".into()).to_string().contains("a/b/c"));

    let err = ControllerError::CacheSync {
        resource: "namespace default".into(),
        reason: "connection refused".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("namespace default"));
    assert!(msg.contains("connection refused"));

    assert!(ControllerError::SyncTimeout(Duration::from_secs(3))
        .to_string()
        .contains("3s"));
}

#[test]
fn test_informer_error_keeps_client_source() {
    let err = InformerError::InitialList(ClientError::Transport("refused".into()));
    let source = err.source().expect("initial list error has a source");
    assert!(source.to_string().contains("refused"));
}

#[test]
fn test_conversions_into_controller_error() {
    let err: ControllerError = InformerError::ChannelClosed.into();
    assert!(matches!(err, ControllerError::Informer(InformerError::ChannelClosed)));

    let err: ControllerError = ConfigError::Parse("bad".into()).into();
    assert!(matches!(err, ControllerError::Config(ConfigError::Parse(_))));
}

#[test]
fn test_client_errors_compare() {
    assert_eq!(ClientError::Gone("7".into()), ClientError::Gone("7".into()));
    assert_ne!(ClientError::Gone("7".into()), ClientError::Transport("7".into()));
}
