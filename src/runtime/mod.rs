//! Controller driver wiring the informer, the queue and the worker pool.

pub mod controller;

pub use controller::Controller;
