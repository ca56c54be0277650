//! # Per-request retry rate limiting.
//!
//! [`RateLimiter`] maps a [`Request`] to the delay before its next attempt.
//! [`ExponentialRateLimiter`] is the default: it counts how many delays were
//! handed out for each request and feeds that count into a [`BackoffPolicy`].
//!
//! ```text
//! next_retry(r) ─► failures[r] = n ─► base × 2^n (≤ max) ─► failures[r] = n + 1
//! forget(r)     ─► failures.remove(r)
//! ```
//!
//! ## Rules
//! - Delays for one request never decrease until [`RateLimiter::forget`] is called.
//! - Counters are independent per request.
//! - The counter map is guarded by a mutex held only for the lookup/update.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::policies::BackoffPolicy;
use crate::request::Request;

/// Computes retry delays per request.
pub trait RateLimiter: Send + Sync + 'static {
    /// Returns the delay before the next attempt of `request` and records the retry.
    fn next_retry(&self, request: &Request) -> Duration;

    /// Resets the retry history of `request`.
    fn forget(&self, request: &Request);

    /// Returns how many retries are currently recorded for `request`.
    fn retries(&self, request: &Request) -> u32;
}

/// Exponential per-request backoff with a ceiling.
#[derive(Debug)]
pub struct ExponentialRateLimiter {
    backoff: BackoffPolicy,
    failures: Mutex<HashMap<Request, u32>>,
}

impl ExponentialRateLimiter {
    /// Creates a limiter using the given backoff bounds.
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the backoff bounds in use.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

impl Default for ExponentialRateLimiter {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl RateLimiter for ExponentialRateLimiter {
    fn next_retry(&self, request: &Request) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock();
            let count = failures.entry(request.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };
        self.backoff.next(attempt)
    }

    fn forget(&self, request: &Request) {
        self.failures.lock().remove(request);
    }

    fn retries(&self, request: &Request) -> u32 {
        self.failures.lock().get(request).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter() -> ExponentialRateLimiter {
        ExponentialRateLimiter::new(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(50),
        ))
    }

    #[test]
    fn test_sequence_doubles_then_caps() {
        let rl = limiter();
        let r = Request::new("http-route", "a");
        let delays: Vec<u64> = (0..8)
            .map(|_| rl.next_retry(&r).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 50, 50]);
        assert_eq!(rl.retries(&r), 8);
    }

    #[test]
    fn test_forget_resets_to_base() {
        let rl = limiter();
        let r = Request::new("http-route", "a");
        rl.next_retry(&r);
        rl.next_retry(&r);
        rl.next_retry(&r);
        rl.forget(&r);
        assert_eq!(rl.retries(&r), 0);
        assert_eq!(rl.next_retry(&r), Duration::from_millis(1));
    }

    #[test]
    fn test_requests_are_independent() {
        let rl = limiter();
        let a = Request::new("http-route", "a");
        let b = Request::new("http-route", "b");
        rl.next_retry(&a);
        rl.next_retry(&a);
        assert_eq!(rl.next_retry(&b), Duration::from_millis(1));
        assert_eq!(rl.next_retry(&a), Duration::from_millis(4));
    }

    #[test]
    fn test_concurrent_callers_count_every_retry() {
        let rl = Arc::new(limiter());
        let r = Request::new("http-route", "a");

        std::thread::scope(|s| {
            for _ in 0..8 {
                let rl = Arc::clone(&rl);
                let r = r.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        rl.next_retry(&r);
                    }
                });
            }
        });

        assert_eq!(rl.retries(&r), 800);
        assert_eq!(rl.next_retry(&r), Duration::from_millis(50));
    }
}
