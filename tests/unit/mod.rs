//! Unit tests for individual components

mod config_test;
mod error_test;
mod escalation_test;
mod key_test;
