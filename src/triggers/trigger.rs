//! # Trigger abstraction and function-backed implementation.
//!
//! A [`Trigger`] is an externally supplied blocking condition (a watch on a
//! snapshot, a certificate refresh, ...). Each call to [`Trigger::wait`]
//! produces a fresh future that completes when the condition fires. The
//! controller re-enqueues the trigger's request every time it does, then waits
//! again.
//!
//! Returning an error counts as "fired" too: the controller logs it at debug
//! level and enqueues anyway.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Shared handle to a trigger.
pub type TriggerRef = Arc<dyn Trigger>;

/// # Re-armable wait condition.
///
/// Implementors should return promptly once `ctx` is cancelled.
pub trait Trigger: Send + Sync + 'static {
    /// Creates a future that resolves when the condition fires.
    fn wait(&self, ctx: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Closure-backed [`Trigger`].
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use tokio::sync::Notify;
/// use tokio_util::sync::CancellationToken;
/// use reconcile_engine::{TriggerFn, TriggerRef};
///
/// let changed = Arc::new(Notify::new());
/// let signal = Arc::clone(&changed);
/// let t: TriggerRef = TriggerFn::arc(move |_ctx: CancellationToken| {
///     let signal = Arc::clone(&signal);
///     async move {
///         signal.notified().await;
///         Ok(())
///     }
/// });
/// # let _ = t;
/// ```
#[derive(Debug)]
pub struct TriggerFn<F> {
    f: F,
}

impl<F> TriggerFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Trigger for TriggerFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn wait(&self, ctx: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin((self.f)(ctx))
    }
}
