//! # Ad-hoc triggers.
//!
//! - [`Trigger`] - re-armable wait condition
//! - [`TriggerFn`] - closure-backed implementation
//! - [`TriggerRef`] - shared handle (`Arc<dyn Trigger>`)
//!
//! The registry that runs them is internal to the controller.

mod registry;
mod trigger;

pub(crate) use registry::TriggerRegistry;
pub use trigger::{Trigger, TriggerFn, TriggerRef};
