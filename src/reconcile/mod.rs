//! # Reconciler contract.
//!
//! - [`Reconciler`] - trait implemented by per-resource business logic
//! - [`ReconcilerFn`] - closure-backed implementation
//! - [`ReconcilerRef`] - shared handle (`Arc<dyn Reconciler>`)

mod reconciler;
mod reconciler_fn;

pub use reconciler::{Reconciler, ReconcilerRef};
pub use reconciler_fn::ReconcilerFn;
