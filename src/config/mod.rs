//! Configuration models for controllers and rate limiters.

pub mod controller;

pub use controller::{ControllerConfig, RateLimiterConfig};
