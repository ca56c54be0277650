//! # Exponential backoff bounds.
//!
//! [`BackoffPolicy`] turns a retry count into a delay. It is parameterized by:
//! - [`BackoffPolicy::base`] the delay for the first retry;
//! - [`BackoffPolicy::max`] the ceiling no delay may exceed.
//!
//! The delay for retry `n` (0-indexed) is `base × 2^n`, clamped to `max`.
//! The computation is done on integer nanoseconds: any overflow on the way
//! (shift, multiply, or conversion back to [`Duration`]) saturates to `max`
//! instead of wrapping.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use reconcile_engine::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::new(Duration::from_millis(5), Duration::from_secs(1));
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(5));
//! assert_eq!(backoff.next(1), Duration::from_millis(10));
//! assert_eq!(backoff.next(3), Duration::from_millis(40));
//!
//! // 5ms × 2^10 = 5.12s → capped
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! assert_eq!(backoff.next(u32::MAX), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Retry backoff bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `base = 5ms`;
    /// - `max = 1000s`.
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy from explicit bounds.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Computes the delay for the given retry number (0-indexed).
    ///
    /// # Notes
    /// - If `base > max`, every retry waits `max`.
    /// - A zero `base` yields zero delays (retries are immediate).
    pub fn next(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let scaled = 1u128
            .checked_shl(attempt)
            .and_then(|factor| self.base.as_nanos().checked_mul(factor));

        match scaled {
            Some(nanos) if nanos <= self.max.as_nanos() => u64::try_from(nanos)
                .map(Duration::from_nanos)
                .unwrap_or(self.max),
            _ => self.max,
        }
    }
}
