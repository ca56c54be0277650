//! Retry policies.
//!
//! This module groups the knobs that control **how long** a failed request
//! waits before it is handed to a worker again.
//!
//! ## Contents
//! - [`BackoffPolicy`] the `base × 2^n` delay curve, capped at `max`
//! - [`RateLimiter`] per-request retry bookkeeping
//! - [`ExponentialRateLimiter`] default limiter built on [`BackoffPolicy`]
//!
//! ## Quick wiring
//! ```text
//! ControllerConfig { backoff: BackoffPolicy, .. }
//!      └─► run_work_queue() builds ExponentialRateLimiter::new(backoff)
//!           └─► RetryQueue::add_rate_limited(r) = add_after(r, limiter.next_retry(r))
//! ```

mod backoff;
mod rate_limiter;

pub use backoff::BackoffPolicy;
pub use rate_limiter::{ExponentialRateLimiter, RateLimiter};
