//! # reconcile-engine
//!
//! **reconcile-engine** drives asynchronous control loops: "when resource X
//! changes, recompute the state derived from it". It takes care of retries,
//! rate limiting and delivery ordering so the per-resource logic only has to
//! implement [`Reconciler`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌─────────────────┐     ┌─────────────────┐       ┌──────────────┐
//!   │  EventSource    │     │  EventSource    │       │   Trigger    │
//!   │  (topic A)      │     │  (topic B)      │       │ (watch, ...) │
//!   └────────┬────────┘     └────────┬────────┘       └──────┬───────┘
//!            ▼                       ▼                       │
//!   subscription task        subscription task         watch task
//!   (framing skip, index     (+ Transform fan-out)           │
//!    dedup, flatten)                 │                       │
//!            └──────────┬────────────┘                       │
//!                       ▼ add(r)                      add(r) ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  WorkQueue (RetryQueue)                                           │
//! │  queue (FIFO) · dirty · processing   → at most one worker per r   │
//! │  add_after ──► DeferQueue (min-heap by ready time) ──► add        │
//! │  add_rate_limited ──► RateLimiter (base × 2^n, ≤ max) ──► add_after
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼ get()            ▼ get()            ▼ get()
//!     ┌──────────┐      ┌──────────┐      ┌──────────┐
//!     │ worker 0 │      │ worker 1 │      │ worker N │
//!     └────┬─────┘      └────┬─────┘      └────┬─────┘
//!          ▼                 ▼                 ▼
//!     Reconciler::reconcile(ctx, r)  (behind a panic barrier)
//! ```
//!
//! ### Retry policy
//! ```text
//! Ok(())                          → forget(r)                 → done(r)
//! Err(RequeueAfter { after: d })  → forget(r), add_after(r, d) → done(r)
//! Err(Fail | Panicked)            → add_rate_limited(r)       → done(r)
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------------|---------------------------------------------|
//! | **Engine**        | Subscriptions, workers and triggers around one work queue.      | [`Controller`], [`ControllerConfig`]        |
//! | **Reconcilers**   | Pluggable per-resource logic, closures or trait objects.        | [`Reconciler`], [`ReconcilerFn`]            |
//! | **Queues**        | Deduplicating work queue and time-ordered deferral.             | [`WorkQueue`], [`RetryQueue`], [`DeferQueue`] |
//! | **Policies**      | Per-request exponential backoff with a ceiling.                 | [`RateLimiter`], [`BackoffPolicy`]          |
//! | **Events**        | Event model, source contract and an in-memory publisher.        | [`EventSource`], [`EventPublisher`]         |
//! | **Triggers**      | External wait conditions that re-enqueue a fixed request.       | [`Trigger`], [`TriggerFn`]                  |
//! | **Errors**        | Typed errors for reconcilers, sources and the engine.           | [`ReconcileError`], [`ControllerError`]     |
//!
//! ## Logging
//! The crate logs through [`tracing`] and installs no subscriber. Each run is
//! wrapped in a `controller` span carrying the controller name.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use reconcile_engine::{
//!     ConfigEntry, Controller, Event, EventPublisher, ReconcileError, ReconcilerFn, Request,
//!     SubscribeRequest, Topic,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let publisher = Arc::new(EventPublisher::default());
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let reconciler = ReconcilerFn::arc(move |_ctx: CancellationToken, req: Request| {
//!         let tx = tx.clone();
//!         async move {
//!             let _ = tx.send(req);
//!             Ok::<_, ReconcileError>(())
//!         }
//!     });
//!
//!     let controller = Controller::new(publisher.clone(), reconciler)
//!         .with_name("http-route")
//!         .with_backoff(Duration::from_millis(5), Duration::from_secs(10))
//!         .subscribe(SubscribeRequest::wildcard("http-route"));
//!
//!     publisher.publish([Event::upsert(
//!         Topic::new("http-route"),
//!         1,
//!         ConfigEntry::new("http-route", "checkout"),
//!     )]);
//!
//!     let token = CancellationToken::new();
//!     let run = tokio::spawn({
//!         let controller = controller.clone();
//!         let token = token.clone();
//!         async move { controller.run(token).await }
//!     });
//!
//!     let reconciled = rx.recv().await.expect("reconciled");
//!     assert_eq!(reconciled, Request::new("http-route", "checkout"));
//!
//!     token.cancel();
//!     run.await??;
//!     Ok(())
//! }
//! ```

mod controller;
mod error;
mod events;
mod policies;
mod queue;
mod reconcile;
mod request;
mod triggers;

// ---- Public re-exports ----

pub use controller::{Controller, ControllerConfig, QueueFactory, Transform};
pub use error::{ControllerError, QueueError, ReconcileError, SourceError};
pub use events::{
    ConfigEntry, ConfigEntryEvent, Event, EventPublisher, EventSource, Flatten, Framing,
    Operation, Payload, Subject, SubscribeRequest, Subscription, Topic,
};
pub use policies::{BackoffPolicy, ExponentialRateLimiter, RateLimiter};
pub use queue::{DeferQueue, RetryQueue, WorkQueue, run_work_queue};
pub use reconcile::{Reconciler, ReconcilerFn, ReconcilerRef};
pub use request::{Request, Tenancy};
pub use triggers::{Trigger, TriggerFn, TriggerRef};
