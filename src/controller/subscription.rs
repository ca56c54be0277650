//! # Subscription task: events in, requests out.
//!
//! One task per registered subscription. It turns a stream of [`Event`]s into
//! work queue adds.
//!
//! ## Flow
//! ```text
//! source.subscribe(req) ──► loop next(ctx):
//!     Err(Canceled)             → exit Ok
//!     Err(other)                → exit Err(Subscription)  (fatal to the run)
//!     framing event             → skip
//!     index <= last seen        → skip (redelivery)
//!     otherwise                 → flatten batches, for each leaf:
//!         ConfigEntry           → default request, or every transform's output
//!         Framing               → skip
//!         Opaque                → exit Err(UnsupportedPayload)
//! always: unsubscribe()
//! ```

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{ControllerError, SourceError};
use crate::events::{
    ConfigEntryEvent, Event, EventSource, Payload, SubscribeRequest, Subscription, Topic,
};
use crate::queue::WorkQueue;
use crate::request::Request;

/// Maps one config-entry change to the requests it should reconcile.
///
/// Lets one event stream drive reconciliation of dependent resources.
pub type Transform = Arc<dyn Fn(&ConfigEntryEvent) -> Vec<Request> + Send + Sync>;

/// A subscription registered on a controller.
#[derive(Clone)]
pub(crate) struct SubscriptionSpec {
    pub request: SubscribeRequest,
    pub transforms: Vec<Transform>,
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("request", &self.request)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

/// Opens the subscription and feeds `queue` until `ctx` is cancelled.
pub(crate) async fn run_subscription(
    source: Arc<dyn EventSource>,
    spec: SubscriptionSpec,
    queue: Arc<dyn WorkQueue>,
    ctx: CancellationToken,
) -> Result<(), ControllerError> {
    let topic = spec.request.topic.clone();
    let mut sub = source
        .subscribe(&spec.request)
        .map_err(|source| ControllerError::Subscribe {
            topic: topic.clone(),
            source,
        })?;
    tracing::debug!(topic = %topic, "subscription opened");

    let res = pump(sub.as_mut(), &spec, queue.as_ref(), &ctx).await;
    sub.unsubscribe();

    match &res {
        Ok(()) => tracing::debug!(topic = %topic, "subscription closed"),
        Err(err) => tracing::error!(
            topic = %topic,
            error = %err,
            label = err.as_label(),
            "subscription failed"
        ),
    }
    res
}

async fn pump(
    sub: &mut dyn Subscription,
    spec: &SubscriptionSpec,
    queue: &dyn WorkQueue,
    ctx: &CancellationToken,
) -> Result<(), ControllerError> {
    let topic = &spec.request.topic;
    let mut last_index = 0u64;

    loop {
        let event = match sub.next(ctx).await {
            Ok(event) => event,
            Err(SourceError::Canceled) => return Ok(()),
            Err(_) if ctx.is_cancelled() => return Ok(()),
            Err(source) => {
                return Err(ControllerError::Subscription {
                    topic: topic.clone(),
                    source,
                });
            }
        };

        if event.is_framing() {
            tracing::trace!(topic = %topic, index = event.index, "framing event skipped");
            continue;
        }
        if event.index <= last_index {
            tracing::trace!(topic = %topic, index = event.index, last_index, "stale event skipped");
            continue;
        }
        last_index = event.index;

        dispatch(&event, spec, topic, queue)?;
    }
}

/// Adds the requests derived from every leaf of `event`.
fn dispatch(
    event: &Event,
    spec: &SubscriptionSpec,
    topic: &Topic,
    queue: &dyn WorkQueue,
) -> Result<(), ControllerError> {
    for leaf in event.flatten() {
        match &leaf.payload {
            Payload::ConfigEntry(change) => {
                if spec.transforms.is_empty() {
                    let request = change.entry.request();
                    tracing::trace!(request = %request, index = leaf.index, "event enqueued");
                    queue.add(request);
                    continue;
                }
                for transform in &spec.transforms {
                    for request in transform(change) {
                        tracing::trace!(request = %request, index = leaf.index, "event enqueued");
                        queue.add(request);
                    }
                }
            }
            Payload::Framing(_) | Payload::Batch(_) => {}
            Payload::Opaque(payload) => {
                return Err(ControllerError::UnsupportedPayload {
                    topic: topic.clone(),
                    payload: payload.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::events::{ConfigEntry, Framing};

    /// Records adds; never hands anything out.
    #[derive(Default)]
    struct Recorder {
        added: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl WorkQueue for Recorder {
        async fn get(&self) -> Option<Request> {
            None
        }
        fn add(&self, request: Request) {
            self.added.lock().push(request);
        }
        async fn add_after(&self, request: Request, _delay: Duration) {
            self.add(request);
        }
        async fn add_rate_limited(&self, request: Request) {
            self.add(request);
        }
        fn forget(&self, _request: &Request) {}
        fn done(&self, _request: &Request) {}
    }

    /// Replays a fixed script, then reports `end`.
    struct Scripted {
        events: VecDeque<Event>,
        end: Option<SourceError>,
        unsubscribed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Subscription for Scripted {
        async fn next(&mut self, _ctx: &CancellationToken) -> Result<Event, SourceError> {
            match self.events.pop_front() {
                Some(ev) => Ok(ev),
                None => Err(self.end.take().unwrap_or(SourceError::Canceled)),
            }
        }
        fn unsubscribe(&mut self) {
            *self.unsubscribed.lock() = true;
        }
    }

    fn topic() -> Topic {
        Topic::new("http-route")
    }

    fn upsert(index: u64, name: &str) -> Event {
        Event::upsert(topic(), index, ConfigEntry::new("http-route", name))
    }

    fn spec(transforms: Vec<Transform>) -> SubscriptionSpec {
        SubscriptionSpec {
            request: SubscribeRequest::wildcard("http-route"),
            transforms,
        }
    }

    async fn pump_script(
        events: Vec<Event>,
        end: Option<SourceError>,
        spec: &SubscriptionSpec,
    ) -> (Result<(), ControllerError>, Vec<Request>) {
        let queue = Recorder::default();
        let mut sub = Scripted {
            events: events.into(),
            end,
            unsubscribed: Arc::default(),
        };
        let res = pump(&mut sub, spec, &queue, &CancellationToken::new()).await;
        let added = queue.added.lock().clone();
        (res, added)
    }

    fn names(requests: &[Request]) -> Vec<&str> {
        requests.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_skips_framing_and_stale_events() {
        let events = vec![
            Event::framing(topic(), 0, Framing::EndOfSnapshot),
            upsert(1, "a"),
            upsert(1, "dup"),
            upsert(3, "b"),
            upsert(2, "late"),
            Event::framing(topic(), 9, Framing::NewSnapshotToFollow),
            upsert(4, "c"),
        ];
        let (res, added) = pump_script(events, None, &spec(vec![])).await;
        assert!(res.is_ok());
        assert_eq!(names(&added), vec!["a", "b", "c"]);
        assert!(added.iter().all(|r| r.kind == "http-route"));
    }

    #[tokio::test]
    async fn test_flattens_nested_batches() {
        let nested = Event::batch(
            topic(),
            5,
            vec![
                upsert(2, "a"),
                Event::framing(topic(), 5, Framing::EndOfSnapshot),
                Event::batch(topic(), 5, vec![upsert(3, "b"), upsert(5, "c")]),
            ],
        );
        let (res, added) = pump_script(vec![nested], None, &spec(vec![])).await;
        assert!(res.is_ok());
        assert_eq!(names(&added), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_transforms_replace_default_request() {
        let fan_out: Transform = Arc::new(|change: &ConfigEntryEvent| {
            vec![
                Request::new("api-gateway", format!("{}-1", change.entry.name)),
                Request::new("api-gateway", format!("{}-2", change.entry.name)),
            ]
        });
        let nothing: Transform = Arc::new(|_: &ConfigEntryEvent| Vec::new());

        let both = spec(vec![fan_out, nothing]);
        let (res, added) = pump_script(vec![upsert(1, "a")], None, &both).await;
        assert!(res.is_ok());
        assert_eq!(names(&added), vec!["a-1", "a-2"]);
        assert!(added.iter().all(|r| r.kind == "api-gateway"));
    }

    #[tokio::test]
    async fn test_opaque_payload_is_fatal() {
        let opaque = Event {
            topic: topic(),
            index: 1,
            payload: Payload::Opaque("service-health".into()),
        };
        let (res, _) = pump_script(vec![opaque], None, &spec(vec![])).await;
        assert!(matches!(
            res,
            Err(ControllerError::UnsupportedPayload { ref payload, .. })
                if payload == "service-health"
        ));
    }

    #[tokio::test]
    async fn test_source_error_is_fatal_and_unsubscribes() {
        let unsubscribed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&unsubscribed);

        struct Failing(Arc<Mutex<bool>>);
        impl EventSource for Failing {
            fn subscribe(&self, _: &SubscribeRequest) -> anyhow::Result<Box<dyn Subscription>> {
                Ok(Box::new(Scripted {
                    events: VecDeque::from([upsert(1, "a")]),
                    end: Some(SourceError::Closed),
                    unsubscribed: Arc::clone(&self.0),
                }))
            }
        }

        let queue: Arc<dyn WorkQueue> = Arc::new(Recorder::default());
        let res = run_subscription(
            Arc::new(Failing(flag)),
            spec(vec![]),
            queue,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            res,
            Err(ControllerError::Subscription { source: SourceError::Closed, .. })
        ));
        assert!(*unsubscribed.lock());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_reported() {
        struct Refusing;
        impl EventSource for Refusing {
            fn subscribe(&self, _: &SubscribeRequest) -> anyhow::Result<Box<dyn Subscription>> {
                anyhow::bail!("acl denied")
            }
        }

        let queue: Arc<dyn WorkQueue> = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let res = run_subscription(Arc::new(Refusing), spec(vec![]), queue, token).await;
        let err = res.unwrap_err();
        assert_eq!(err.as_label(), "controller_subscribe_failed");
        assert_eq!(err.to_string(), "subscribe to topic http-route failed: acl denied");
    }
}
