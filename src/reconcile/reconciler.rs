//! # Reconciler abstraction.
//!
//! This module defines the [`Reconciler`] trait, the single pluggable
//! operation of the engine. The common handle type is [`ReconcilerRef`], an
//! `Arc<dyn Reconciler>` shared by every worker of a controller.
//!
//! A reconciler receives a [`CancellationToken`] that fires when the
//! controller shuts down; long reconciliations should watch it and return.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;
use crate::request::Request;

/// Shared handle to a reconciler.
pub type ReconcilerRef = Arc<dyn Reconciler>;

/// # Converges real state toward desired state for one request.
///
/// The result decides what happens next:
/// - `Ok(())` resets the request's backoff;
/// - [`ReconcileError::RequeueAfter`] re-adds the request after exactly that delay;
/// - any other error re-adds it after an exponentially growing delay.
///
/// A panic is caught by the worker and handled like a failure.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use reconcile_engine::{ReconcileError, Reconciler, Request};
///
/// struct Printer;
///
/// #[async_trait]
/// impl Reconciler for Printer {
///     async fn reconcile(&self, ctx: CancellationToken, request: Request) -> Result<(), ReconcileError> {
///         if ctx.is_cancelled() {
///             return Ok(());
///         }
///         println!("reconciling {request}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Reconciles `request`.
    async fn reconcile(&self, ctx: CancellationToken, request: Request)
    -> Result<(), ReconcileError>;
}
