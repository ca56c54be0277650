//! # Controller: the reconciliation engine.
//!
//! - [`Controller`] - builder and run loop
//! - [`ControllerConfig`] - worker count, backoff, queue and shutdown knobs
//! - [`Transform`] - maps one config-entry change to derived requests
//! - [`QueueFactory`] - replaces the default work queue (instrumentation, tests)
//!
//! Subscription and worker loops are internal.

mod config;
mod core;
mod subscription;
mod worker;

pub use config::ControllerConfig;
pub use self::core::{Controller, QueueFactory};
pub use subscription::Transform;
