//! # In-process event publisher.
//!
//! [`EventPublisher`] is an [`EventSource`] backed by [`tokio::sync::broadcast`].
//! It keeps the latest upsert of every entry per topic so that a subscriber
//! joining late still observes the current state.
//!
//! ## Architecture
//! ```text
//! publish(events) ──► retained: topic → {request → latest upsert}
//!                 └─► group by (topic, index) ──► broadcast ring buffer ──► MemorySubscription (one per subscribe)
//!
//! subscribe(req) delivers:
//!   1. Batch(snapshot of retained entries selected by req)   index = max retained index
//!   2. Framing(EndOfSnapshot)                                 index = same
//!   3. live events on req.topic selected by req.subject
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits on subscribers.
//! - **No gaps**: the snapshot is taken and the live receiver created under the
//!   same lock that `publish` holds, so every event is either in the snapshot
//!   or delivered live (possibly both; consumers deduplicate by index).
//! - **Lag handling**: a subscriber that falls more than `capacity` events
//!   behind gets [`SourceError::Lagged`].
//! - **Deletes** evict the retained entry and are broadcast like any event.
//! - **Commits**: events sharing a topic and index are delivered as one batch,
//!   since consumers skip any event whose index they have already seen.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::events::{
    ConfigEntry, Event, EventSource, Framing, Operation, Payload, SubscribeRequest, Subscription,
    Topic,
};
use crate::request::Request;

/// In-memory, broadcast-based event source.
#[derive(Debug)]
pub struct EventPublisher {
    tx: broadcast::Sender<Arc<Event>>,
    retained: Mutex<HashMap<Topic, BTreeMap<Request, Event>>>,
}

impl EventPublisher {
    /// Creates a publisher whose live ring buffer holds `capacity` events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            retained: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes events in order to all current subscribers.
    ///
    /// Consecutive events on the same topic with the same index belong to one
    /// commit and are broadcast together as a single batch event.
    pub fn publish(&self, events: impl IntoIterator<Item = Event>) {
        let mut retained = self.retained.lock();
        let mut commit: Vec<Event> = Vec::new();
        for ev in events {
            retain(&mut retained, &ev);
            if commit
                .last()
                .is_some_and(|prev| prev.topic != ev.topic || prev.index != ev.index)
            {
                self.broadcast(std::mem::take(&mut commit));
            }
            commit.push(ev);
        }
        self.broadcast(commit);
    }

    fn broadcast(&self, mut commit: Vec<Event>) {
        let ev = match commit.len() {
            0 => return,
            1 => commit.swap_remove(0),
            _ => Event::batch(commit[0].topic.clone(), commit[0].index, commit),
        };
        let _ = self.tx.send(Arc::new(ev));
    }

    /// Returns the number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSource for EventPublisher {
    fn subscribe(&self, request: &SubscribeRequest) -> anyhow::Result<Box<dyn Subscription>> {
        let (rx, snapshot) = {
            let retained = self.retained.lock();
            let snapshot: Vec<Event> = retained
                .get(&request.topic)
                .map(|entries| {
                    entries
                        .values()
                        .filter(|ev| entry_of(ev).is_some_and(|e| request.selects(e)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            (self.tx.subscribe(), snapshot)
        };

        let index = snapshot.iter().map(|ev| ev.index).max().unwrap_or(0);
        let mut pending = VecDeque::with_capacity(2);
        if !snapshot.is_empty() {
            pending.push_back(Event::batch(request.topic.clone(), index, snapshot));
        }
        pending.push_back(Event::framing(
            request.topic.clone(),
            index,
            Framing::EndOfSnapshot,
        ));

        Ok(Box::new(MemorySubscription {
            request: request.clone(),
            rx: Some(rx),
            pending,
        }))
    }
}

/// Records the latest state of every entry touched by `ev`.
fn retain(retained: &mut HashMap<Topic, BTreeMap<Request, Event>>, ev: &Event) {
    for leaf in ev.flatten() {
        let Payload::ConfigEntry(change) = &leaf.payload else {
            continue;
        };
        let entries = retained.entry(leaf.topic.clone()).or_default();
        match change.op {
            Operation::Upsert => {
                entries.insert(change.entry.request(), leaf.clone());
            }
            Operation::Delete => {
                entries.remove(&change.entry.request());
            }
        }
    }
}

fn entry_of(ev: &Event) -> Option<&ConfigEntry> {
    match &ev.payload {
        Payload::ConfigEntry(change) => Some(&change.entry),
        _ => None,
    }
}

/// Subscription handle returned by [`EventPublisher`].
struct MemorySubscription {
    request: SubscribeRequest,
    rx: Option<broadcast::Receiver<Arc<Event>>>,
    pending: VecDeque<Event>,
}

impl MemorySubscription {
    /// Applies topic and subject filtering to a live event.
    fn select(&self, ev: &Event) -> Option<Event> {
        if ev.topic != self.request.topic {
            return None;
        }
        match &ev.payload {
            Payload::ConfigEntry(change) => self
                .request
                .selects(&change.entry)
                .then(|| ev.clone()),
            Payload::Batch(_) => {
                let leaves: Vec<Event> = ev
                    .flatten()
                    .filter(|leaf| entry_of(leaf).is_none_or(|e| self.request.selects(e)))
                    .cloned()
                    .collect();
                (!leaves.is_empty()).then(|| Event::batch(ev.topic.clone(), ev.index, leaves))
            }
            Payload::Framing(_) | Payload::Opaque(_) => Some(ev.clone()),
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self, ctx: &CancellationToken) -> Result<Event, SourceError> {
        if ctx.is_cancelled() {
            return Err(SourceError::Canceled);
        }
        if let Some(ev) = self.pending.pop_front() {
            return Ok(ev);
        }

        loop {
            let Some(rx) = self.rx.as_mut() else {
                return Err(SourceError::Closed);
            };
            let msg = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(SourceError::Canceled),
                msg = rx.recv() => msg,
            };
            match msg {
                Ok(ev) => {
                    if let Some(selected) = self.select(&ev) {
                        return Ok(selected);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SourceError::Closed),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(SourceError::Lagged { skipped });
                }
            }
        }
    }

    fn unsubscribe(&mut self) {
        self.rx = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(name: &str) -> ConfigEntry {
        ConfigEntry::new("http-route", name)
    }

    fn topic() -> Topic {
        Topic::new("http-route")
    }

    async fn next(sub: &mut Box<dyn Subscription>) -> Event {
        let ctx = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(1), sub.next(&ctx))
            .await
            .expect("no event within 1s")
            .expect("subscription error")
    }

    #[tokio::test]
    async fn test_empty_snapshot_then_live_events() {
        let publisher = EventPublisher::new(16);
        let mut sub = publisher
            .subscribe(&SubscribeRequest::wildcard("http-route"))
            .unwrap();

        let first = next(&mut sub).await;
        assert_eq!(first, Event::framing(topic(), 0, Framing::EndOfSnapshot));

        publisher.publish([Event::upsert(topic(), 1, entry("a"))]);
        assert_eq!(next(&mut sub).await, Event::upsert(topic(), 1, entry("a")));
    }

    #[tokio::test]
    async fn test_snapshot_replays_latest_retained_entries() {
        let publisher = EventPublisher::new(16);
        publisher.publish([
            Event::upsert(topic(), 1, entry("a")),
            Event::upsert(topic(), 2, entry("b")),
            Event::upsert(topic(), 3, entry("a")),
            Event::upsert(topic(), 4, entry("c")),
            Event::delete(topic(), 5, entry("c")),
        ]);

        let mut sub = publisher
            .subscribe(&SubscribeRequest::wildcard("http-route"))
            .unwrap();

        let snapshot = next(&mut sub).await;
        assert_eq!(snapshot.index, 3);
        let indexes: Vec<u64> = snapshot.flatten().map(|e| e.index).collect();
        assert_eq!(indexes, vec![3, 2]);

        let marker = next(&mut sub).await;
        assert_eq!(marker, Event::framing(topic(), 3, Framing::EndOfSnapshot));
    }

    #[tokio::test]
    async fn test_named_subject_filters_live_and_batch_events() {
        let publisher = EventPublisher::new(16);
        let mut sub = publisher
            .subscribe(&SubscribeRequest::named("http-route", "b"))
            .unwrap();
        next(&mut sub).await;

        publisher.publish([
            Event::upsert(topic(), 1, entry("a")),
            Event::upsert(Topic::new("tcp-route"), 2, entry("b")),
            Event::batch(
                topic(),
                3,
                vec![
                    Event::upsert(topic(), 3, entry("a")),
                    Event::upsert(topic(), 3, entry("b")),
                ],
            ),
        ]);

        let ev = next(&mut sub).await;
        assert_eq!(ev.index, 3);
        let leaves: Vec<&Event> = ev.flatten().collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(entry_of(leaves[0]), Some(&entry("b")));
    }

    #[tokio::test]
    async fn test_same_index_events_are_delivered_as_one_batch() {
        let publisher = EventPublisher::new(16);
        let mut sub = publisher
            .subscribe(&SubscribeRequest::wildcard("http-route"))
            .unwrap();
        next(&mut sub).await;

        publisher.publish([
            Event::upsert(topic(), 7, entry("a")),
            Event::upsert(topic(), 7, entry("b")),
            Event::upsert(topic(), 8, entry("c")),
        ]);

        let commit = next(&mut sub).await;
        assert_eq!(commit.index, 7);
        let names: Vec<&str> = commit
            .flatten()
            .filter_map(|leaf| entry_of(leaf).map(|e| e.name.as_str()))
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert_eq!(next(&mut sub).await, Event::upsert(topic(), 8, entry("c")));
    }

    #[tokio::test]
    async fn test_cancel_and_unsubscribe() {
        let publisher = EventPublisher::new(16);
        let mut sub = publisher
            .subscribe(&SubscribeRequest::wildcard("http-route"))
            .unwrap();
        next(&mut sub).await;

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(matches!(sub.next(&ctx).await, Err(SourceError::Canceled)));

        sub.unsubscribe();
        let ctx = CancellationToken::new();
        assert!(matches!(sub.next(&ctx).await, Err(SourceError::Closed)));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_reports_lag() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher
            .subscribe(&SubscribeRequest::wildcard("http-route"))
            .unwrap();
        next(&mut sub).await;

        publisher.publish((1..=5).map(|i| Event::upsert(topic(), i, entry("a"))));

        let ctx = CancellationToken::new();
        assert!(matches!(
            sub.next(&ctx).await,
            Err(SourceError::Lagged { skipped: 3 })
        ));
    }
}
