//! # Controller configuration.
//!
//! [`ControllerConfig`] holds every knob of a controller run. It is normally
//! changed through the builder-style setters on
//! [`Controller`](crate::Controller), which refuse to run after start.
//!
//! ## Minimums
//! - `workers = 0` → 1 worker
//! - `defer_capacity = 0` → 1
//! - `heartbeat < 1ms` → 1ms

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Configuration of a controller run.
///
/// ## Field semantics
/// - `workers`: number of concurrent reconcile loops (min 1)
/// - `backoff`: bounds of the default rate limiter
/// - `defer_capacity`: arrivals buffered by the defer queue before `add_after` waits (min 1)
/// - `heartbeat`: safety tick of the defer queue (min 1ms)
/// - `grace`: how long a stopping run waits for in-flight reconciliations
///
/// ## Notes
/// All fields are public. Use the `*_clamped` accessors instead of reading
/// the raw values.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Backoff bounds for generic reconcile failures.
    pub backoff: BackoffPolicy,

    /// Capacity of the defer queue arrival channel.
    pub defer_capacity: usize,

    /// Maximum interval between two checks of the defer heap.
    pub heartbeat: Duration,

    /// Maximum time to wait for workers after cancellation.
    ///
    /// Workers still running after `grace` are aborted and a warning is logged.
    pub grace: Duration,
}

impl ControllerConfig {
    /// Returns the worker count clamped to a minimum of 1.
    #[inline]
    pub fn workers_clamped(&self) -> usize {
        self.workers.max(1)
    }

    /// Returns the defer capacity clamped to a minimum of 1.
    #[inline]
    pub fn defer_capacity_clamped(&self) -> usize {
        self.defer_capacity.max(1)
    }

    /// Returns the heartbeat clamped to a minimum of 1ms.
    #[inline]
    pub fn heartbeat_clamped(&self) -> Duration {
        self.heartbeat.max(Duration::from_millis(1))
    }
}

impl Default for ControllerConfig {
    /// Default configuration:
    ///
    /// - `workers = 1`
    /// - `backoff = 5ms .. 1000s`
    /// - `defer_capacity = 1024`
    /// - `heartbeat = 10s`
    /// - `grace = 30s`
    fn default() -> Self {
        Self {
            workers: 1,
            backoff: BackoffPolicy::default(),
            defer_capacity: 1024,
            heartbeat: Duration::from_secs(10),
            grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.workers_clamped(), 1);
        assert_eq!(cfg.backoff.base, Duration::from_millis(5));
        assert_eq!(cfg.backoff.max, Duration::from_secs(1000));
        assert_eq!(cfg.defer_capacity_clamped(), 1024);
        assert_eq!(cfg.heartbeat_clamped(), Duration::from_secs(10));
    }

    #[test]
    fn test_clamping() {
        let cfg = ControllerConfig {
            workers: 0,
            defer_capacity: 0,
            heartbeat: Duration::ZERO,
            ..ControllerConfig::default()
        };
        assert_eq!(cfg.workers_clamped(), 1);
        assert_eq!(cfg.defer_capacity_clamped(), 1);
        assert_eq!(cfg.heartbeat_clamped(), Duration::from_millis(1));
    }
}
