//! Change events: data model, source contract and an in-process publisher.
//!
//! This module groups the event **data model** the controller consumes, the
//! **contract** an external event source must satisfy, and an in-memory
//! **publisher** implementing that contract.
//!
//! ## Contents
//! - [`Event`], [`Payload`], [`Topic`], [`SubscribeRequest`] event model
//! - [`EventSource`], [`Subscription`] source contract
//! - [`EventPublisher`] broadcast-backed source with snapshot replay
//!
//! ## Quick reference
//! - **Producers**: a state store (external) or [`EventPublisher::publish`].
//! - **Consumers**: one subscription task per `Controller::subscribe` call.

mod event;
mod publisher;
mod source;

pub use event::{
    ConfigEntry, ConfigEntryEvent, Event, Flatten, Framing, Operation, Payload, Subject,
    SubscribeRequest, Topic,
};
pub use publisher::EventPublisher;
pub use source::{EventSource, Subscription};
