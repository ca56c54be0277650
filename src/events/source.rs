//! # Event source contract.
//!
//! The controller never talks to a state store directly. It opens
//! subscriptions through [`EventSource`] and pulls events with
//! [`Subscription::next`] until its cancellation token fires.
//!
//! ## Contract
//! - `subscribe` returns a handle positioned at the start of the stream
//!   (sources that keep state typically replay a snapshot first).
//! - `next` suspends until an event is available; it returns
//!   [`SourceError::Canceled`] when `ctx` is cancelled, which the controller
//!   treats as a clean exit. Any other error aborts the controller run.
//! - `unsubscribe` releases the handle; later `next` calls return
//!   [`SourceError::Closed`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::events::{Event, SubscribeRequest};

/// Publisher side of the change stream.
pub trait EventSource: Send + Sync + 'static {
    /// Opens a subscription for `request`.
    fn subscribe(&self, request: &SubscribeRequest) -> anyhow::Result<Box<dyn Subscription>>;
}

/// An open change stream.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next event.
    async fn next(&mut self, ctx: &CancellationToken) -> Result<Event, SourceError>;

    /// Closes the subscription.
    fn unsubscribe(&mut self);
}
