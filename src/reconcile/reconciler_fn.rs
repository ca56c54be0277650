//! # Function-backed reconciler (`ReconcilerFn`)
//!
//! [`ReconcilerFn`] wraps a closure `F: Fn(CancellationToken, Request) -> Fut`
//! and creates a fresh future per call. Shared state goes into the closure
//! explicitly, usually as an `Arc<...>`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tokio_util::sync::CancellationToken;
//! use reconcile_engine::{ReconcileError, ReconcilerFn, ReconcilerRef, Request};
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let r: ReconcilerRef = ReconcilerFn::arc(move |_ctx: CancellationToken, _req: Request| {
//!     let counter = Arc::clone(&counter);
//!     async move {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok::<_, ReconcileError>(())
//!     }
//! });
//! # let _ = r;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;
use crate::reconcile::Reconciler;
use crate::request::Request;

/// Closure-backed [`Reconciler`].
#[derive(Debug)]
pub struct ReconcilerFn<F> {
    f: F,
}

impl<F> ReconcilerFn<F> {
    /// Wraps `f`.
    ///
    /// Prefer [`ReconcilerFn::arc`] when you immediately need a
    /// [`ReconcilerRef`](crate::ReconcilerRef).
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Reconciler for ReconcilerFn<F>
where
    F: Fn(CancellationToken, Request) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<(), ReconcileError>> + Send + 'static,
{
    async fn reconcile(
        &self,
        ctx: CancellationToken,
        request: Request,
    ) -> Result<(), ReconcileError> {
        (self.f)(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_receives_request() {
        let r = ReconcilerFn::new(|_ctx: CancellationToken, req: Request| async move {
            if req.name == "bad" {
                Err(ReconcileError::fail("bad name"))
            } else {
                Ok(())
            }
        });
        let ctx = CancellationToken::new();
        assert!(r.reconcile(ctx.clone(), Request::new("k", "good")).await.is_ok());
        let err = r.reconcile(ctx, Request::new("k", "bad")).await.unwrap_err();
        assert_eq!(err.as_label(), "reconcile_failed");
    }
}
