//! # Change events consumed by the controller.
//!
//! An [`Event`] is one change notification on a [`Topic`]. Its [`Payload`] is a
//! closed set of shapes the controller dispatches on exhaustively:
//!
//! - [`Payload::ConfigEntry`] a single resource changed;
//! - [`Payload::Batch`] several events delivered together (snapshots);
//! - [`Payload::Framing`] stream markers carrying no resource;
//! - [`Payload::Opaque`] a payload the engine cannot map to requests.
//!
//! ## Ordering
//! Every event carries a per-subscription `index` that only ever grows.
//! Consumers drop events whose index is not strictly greater than the last
//! one they processed, which makes redelivery harmless.
//!
//! ## Example
//! ```rust
//! use reconcile_engine::{ConfigEntry, Event, Topic};
//!
//! let topic = Topic::new("api-gateway");
//! let ev = Event::upsert(topic.clone(), 7, ConfigEntry::new("api-gateway", "edge"));
//! assert_eq!(ev.index, 7);
//! assert!(!ev.is_framing());
//!
//! let snapshot = Event::batch(topic, 7, vec![ev]);
//! assert_eq!(snapshot.flatten().count(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::request::{Request, Tenancy};

/// Name of an event stream (typically one per resource kind).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Creates a topic from its name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects which resources of a topic a subscription receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    /// Every resource on the topic.
    Wildcard,
    /// Only resources with this name.
    Name(String),
}

/// Descriptor passed to [`EventSource::subscribe`](crate::EventSource::subscribe).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Topic to follow.
    pub topic: Topic,
    /// Resource selector within the topic.
    pub subject: Subject,
}

impl SubscribeRequest {
    /// Subscribes to every resource on `topic`.
    pub fn wildcard(topic: impl Into<Arc<str>>) -> Self {
        Self {
            topic: Topic::new(topic),
            subject: Subject::Wildcard,
        }
    }

    /// Subscribes to the resource called `name` on `topic`.
    pub fn named(topic: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self {
            topic: Topic::new(topic),
            subject: Subject::Name(name.into()),
        }
    }

    /// Returns true if `entry` is selected by this request's subject.
    pub fn selects(&self, entry: &ConfigEntry) -> bool {
        match &self.subject {
            Subject::Wildcard => true,
            Subject::Name(name) => entry.name == *name,
        }
    }
}

/// Identity of a stored configuration entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfigEntry {
    /// Entry kind (e.g. `"http-route"`).
    pub kind: String,
    /// Entry name.
    pub name: String,
    /// Optional tenancy of the entry.
    pub tenancy: Option<Tenancy>,
}

impl ConfigEntry {
    /// Creates an unscoped entry identity.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            tenancy: None,
        }
    }

    /// Returns the same entry qualified by `tenancy`.
    #[must_use]
    pub fn with_tenancy(mut self, tenancy: Tenancy) -> Self {
        self.tenancy = Some(tenancy);
        self
    }

    /// Returns the request that reconciles this entry.
    pub fn request(&self) -> Request {
        Request {
            kind: self.kind.clone(),
            name: self.name.clone(),
            tenancy: self.tenancy.clone(),
        }
    }
}

/// Kind of change applied to an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Entry created or updated.
    Upsert,
    /// Entry deleted.
    Delete,
}

/// A single entry change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEntryEvent {
    /// What happened.
    pub op: Operation,
    /// Which entry it happened to.
    pub entry: ConfigEntry,
}

/// Stream markers with no resource attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// The initial snapshot has been fully delivered.
    EndOfSnapshot,
    /// The stream is being reset and a fresh snapshot follows.
    NewSnapshotToFollow,
}

/// Event body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// One entry changed.
    ConfigEntry(ConfigEntryEvent),
    /// Several events delivered as one (may nest).
    Batch(Vec<Event>),
    /// Stream framing marker.
    Framing(Framing),
    /// A payload with no resource identity; names its type.
    Opaque(String),
}

/// One change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Topic the event was published on.
    pub topic: Topic,
    /// Monotonic index of the change.
    pub index: u64,
    /// Event body.
    pub payload: Payload,
}

impl Event {
    /// Creates an upsert event for `entry`.
    pub fn upsert(topic: Topic, index: u64, entry: ConfigEntry) -> Self {
        Self::entry(topic, index, Operation::Upsert, entry)
    }

    /// Creates a delete event for `entry`.
    pub fn delete(topic: Topic, index: u64, entry: ConfigEntry) -> Self {
        Self::entry(topic, index, Operation::Delete, entry)
    }

    /// Creates a single-entry event.
    pub fn entry(topic: Topic, index: u64, op: Operation, entry: ConfigEntry) -> Self {
        Self {
            topic,
            index,
            payload: Payload::ConfigEntry(ConfigEntryEvent { op, entry }),
        }
    }

    /// Creates a batch event wrapping `events`.
    pub fn batch(topic: Topic, index: u64, events: Vec<Event>) -> Self {
        Self {
            topic,
            index,
            payload: Payload::Batch(events),
        }
    }

    /// Creates a framing event.
    pub fn framing(topic: Topic, index: u64, marker: Framing) -> Self {
        Self {
            topic,
            index,
            payload: Payload::Framing(marker),
        }
    }

    /// Returns true for stream markers that carry no resource.
    pub fn is_framing(&self) -> bool {
        matches!(self.payload, Payload::Framing(_))
    }

    /// Iterates over the non-batch events contained in this event, depth first.
    ///
    /// A non-batch event yields itself; a batch yields its leaves in order.
    pub fn flatten(&self) -> Flatten<'_> {
        Flatten { stack: vec![self] }
    }
}

/// Depth-first iterator over the leaves of a (possibly nested) batch event.
#[derive(Debug)]
pub struct Flatten<'a> {
    stack: Vec<&'a Event>,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ev) = self.stack.pop() {
            match &ev.payload {
                Payload::Batch(children) => self.stack.extend(children.iter().rev()),
                _ => return Some(ev),
            }
        }
        None
    }
}
