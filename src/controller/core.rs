//! # Controller: subscriptions, workers and triggers around one work queue.
//!
//! A [`Controller`] is configured with builder-style setters, then started
//! once with [`Controller::run`], which blocks until the given token is
//! cancelled or a subscription fails.
//!
//! ## Architecture
//! ```text
//! Controller::run(token)
//!   ├─► run_token = token.child_token()
//!   ├─► queue = factory(run_token, config)        (default: run_work_queue)
//!   ├─► flush requests enqueued before run
//!   ├─► triggers.attach(queue, run_token)          (one watch task per trigger)
//!   ├─► JoinSet:
//!   │     ├─ run_subscription × subscriptions      (events → queue.add)
//!   │     └─ run_worker × workers                  (queue.get → reconcile → retry policy)
//!   └─► wait: token cancelled → Ok
//!             a task fails    → cancel run_token, Err
//!       then: triggers.stop(), drain JoinSet within `grace`, abort stragglers
//! ```
//!
//! ## Rules
//! - `run` may be called once; configuring a started controller panics.
//! - Only subscription failures leave `run` as errors; reconcile failures
//!   and reconciler panics are retried.
//! - The controller is a cheap handle: clones share the same engine, so a
//!   reconciler can hold one and call [`Controller::enqueue`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::controller::ControllerConfig;
use crate::controller::subscription::{SubscriptionSpec, Transform, run_subscription};
use crate::controller::worker::run_worker;
use crate::error::ControllerError;
use crate::events::{EventSource, SubscribeRequest};
use crate::policies::BackoffPolicy;
use crate::queue::{WorkQueue, run_work_queue};
use crate::reconcile::ReconcilerRef;
use crate::request::Request;
use crate::triggers::{TriggerRef, TriggerRegistry};

/// Builds the work queue for a run.
///
/// Receives the run's cancellation token and the controller configuration.
pub type QueueFactory =
    Arc<dyn Fn(CancellationToken, &ControllerConfig) -> Arc<dyn WorkQueue> + Send + Sync>;

/// Reconciliation engine handle.
///
/// ## Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use reconcile_engine::{
///     Controller, EventPublisher, ReconcileError, ReconcilerFn, Request, SubscribeRequest,
/// };
///
/// # async fn demo() -> Result<(), reconcile_engine::ControllerError> {
/// let publisher = Arc::new(EventPublisher::default());
/// let reconciler = ReconcilerFn::arc(|_ctx: CancellationToken, req: Request| async move {
///     println!("reconciling {req}");
///     Ok::<_, ReconcileError>(())
/// });
///
/// let controller = Controller::new(publisher, reconciler)
///     .with_name("http-route")
///     .with_workers(4)
///     .subscribe(SubscribeRequest::wildcard("http-route"));
///
/// controller.run(CancellationToken::new()).await
/// # }
/// ```
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn EventSource>,
    reconciler: ReconcilerRef,
    settings: Mutex<Settings>,
    started: AtomicBool,
    triggers: TriggerRegistry,
    intake: Mutex<Intake>,
}

#[derive(Clone)]
struct Settings {
    name: String,
    config: ControllerConfig,
    subscriptions: Vec<SubscriptionSpec>,
    factory: QueueFactory,
}

/// Requests enqueued directly, before and after the queue exists.
#[derive(Default)]
struct Intake {
    buffered: Vec<Request>,
    queue: Option<Arc<dyn WorkQueue>>,
}

impl Controller {
    /// Creates a controller reading from `source` and reconciling with `reconciler`.
    pub fn new(source: Arc<dyn EventSource>, reconciler: ReconcilerRef) -> Self {
        let factory: QueueFactory = Arc::new(run_work_queue);
        Self {
            inner: Arc::new(Inner {
                source,
                reconciler,
                settings: Mutex::new(Settings {
                    name: "controller".to_string(),
                    config: ControllerConfig::default(),
                    subscriptions: Vec::new(),
                    factory,
                }),
                started: AtomicBool::new(false),
                triggers: TriggerRegistry::new(),
                intake: Mutex::new(Intake::default()),
            }),
        }
    }

    /// Returns the controller name used in logs.
    pub fn name(&self) -> String {
        self.inner.settings.lock().name.clone()
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> ControllerConfig {
        self.inner.settings.lock().config.clone()
    }

    /// Returns true once [`run`](Self::run) was called.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Sets the name recorded on the controller's tracing span.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure(|s| s.name = name);
        self
    }

    /// Replaces the whole configuration.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn with_config(self, config: ControllerConfig) -> Self {
        self.configure(|s| s.config = config);
        self
    }

    /// Sets the bounds of the default rate limiter.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn with_backoff(self, base: Duration, max: Duration) -> Self {
        self.configure(|s| s.config.backoff = BackoffPolicy::new(base, max));
        self
    }

    /// Sets the number of workers; `0` means 1.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn with_workers(self, workers: usize) -> Self {
        self.configure(|s| s.config.workers = workers.max(1));
        self
    }

    /// Replaces the work queue factory.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn with_queue_factory<F>(self, factory: F) -> Self
    where
        F: Fn(CancellationToken, &ControllerConfig) -> Arc<dyn WorkQueue> + Send + Sync + 'static,
    {
        let factory: QueueFactory = Arc::new(factory);
        self.configure(|s| s.factory = factory);
        self
    }

    /// Adds a subscription whose entries are reconciled under their own identity.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn subscribe(self, request: SubscribeRequest) -> Self {
        self.subscribe_with(request, Vec::new())
    }

    /// Adds a subscription whose entries are mapped through `transforms`.
    ///
    /// Every transform is applied to every entry; their outputs are all
    /// enqueued. With no transforms the entry's own request is enqueued.
    ///
    /// # Panics
    /// If the controller was started.
    #[must_use]
    pub fn subscribe_with(self, request: SubscribeRequest, transforms: Vec<Transform>) -> Self {
        self.configure(|s| {
            s.subscriptions.push(SubscriptionSpec {
                request,
                transforms,
            })
        });
        self
    }

    /// Registers `trigger` for `request`, replacing any previous trigger for it.
    ///
    /// Every time the trigger fires, `request` is enqueued. Works before and
    /// after start.
    pub fn add_trigger(&self, request: Request, trigger: TriggerRef) {
        self.inner.triggers.add(request, trigger);
    }

    /// Removes the trigger for `request`; returns false if there was none.
    ///
    /// Once this returns the removed trigger never enqueues again.
    pub fn remove_trigger(&self, request: &Request) -> bool {
        self.inner.triggers.remove(request)
    }

    /// Enqueues requests directly.
    ///
    /// Before [`run`](Self::run) the requests are held and queued when the
    /// run starts; after the run ended they are dropped.
    pub fn enqueue(&self, requests: impl IntoIterator<Item = Request>) {
        let mut intake = self.inner.intake.lock();
        match intake.queue.clone() {
            Some(queue) => requests.into_iter().for_each(|r| queue.add(r)),
            None => intake.buffered.extend(requests),
        }
    }

    /// Runs the engine until `token` is cancelled.
    ///
    /// Returns an error only if a subscription fails; the other tasks are
    /// stopped first.
    ///
    /// # Panics
    /// If called more than once. Must be called inside a tokio runtime.
    pub async fn run(&self, token: CancellationToken) -> Result<(), ControllerError> {
        let settings = {
            let settings = self.inner.settings.lock();
            let already = self.inner.started.swap(true, Ordering::AcqRel);
            assert!(!already, "controller {:?} already started", settings.name);
            settings.clone()
        };

        let span = tracing::info_span!("controller", name = %settings.name);
        self.run_inner(settings, token).instrument(span).await
    }

    async fn run_inner(
        &self,
        settings: Settings,
        token: CancellationToken,
    ) -> Result<(), ControllerError> {
        let run_token = token.child_token();
        let workers = settings.config.workers_clamped();

        let queue = (settings.factory)(run_token.clone(), &settings.config);
        self.attach_queue(&queue);
        self.inner.triggers.attach(Arc::clone(&queue), run_token.clone());

        tracing::info!(
            workers,
            subscriptions = settings.subscriptions.len(),
            "controller started"
        );

        let mut set = JoinSet::new();
        for spec in settings.subscriptions {
            let task = format!("subscription {}", spec.request.topic);
            let fut = run_subscription(
                Arc::clone(&self.inner.source),
                spec,
                Arc::clone(&queue),
                run_token.clone(),
            );
            set.spawn(supervised(task, fut).in_current_span());
        }
        for id in 0..workers {
            let fut = run_worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&self.inner.reconciler),
                run_token.clone(),
            );
            set.spawn(supervised(format!("worker {id}"), fut.map(Ok)).in_current_span());
        }

        let result = tokio::select! {
            _ = run_token.cancelled() => Ok(()),
            res = first_failure(&mut set) => res,
        };

        run_token.cancel();
        self.inner.triggers.stop().await;
        drain(&mut set, settings.config.grace).await;

        match &result {
            Ok(()) => tracing::info!("controller stopped"),
            Err(err) => tracing::error!(error = %err, label = err.as_label(), "controller failed"),
        }
        result
    }

    fn attach_queue(&self, queue: &Arc<dyn WorkQueue>) {
        let mut intake = self.inner.intake.lock();
        for request in intake.buffered.drain(..) {
            queue.add(request);
        }
        intake.queue = Some(Arc::clone(queue));
    }

    /// Applies `f` to the settings unless the controller was started.
    fn configure(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.inner.settings.lock();
        assert!(
            !self.inner.started.load(Ordering::Acquire),
            "controller {:?} cannot be configured after start",
            settings.name
        );
        f(&mut settings);
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.inner.settings.lock();
        f.debug_struct("Controller")
            .field("name", &settings.name)
            .field("config", &settings.config)
            .field("subscriptions", &settings.subscriptions)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Turns a panic of an engine task into [`ControllerError::TaskPanicked`].
async fn supervised<F>(task: String, fut: F) -> Result<(), ControllerError>
where
    F: Future<Output = Result<(), ControllerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(_) => Err(ControllerError::TaskPanicked { task }),
    }
}

/// Resolves with the first task error; pends forever if every task succeeds.
async fn first_failure(
    set: &mut JoinSet<Result<(), ControllerError>>,
) -> Result<(), ControllerError> {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => tracing::warn!(error = %err, "engine task did not complete"),
        }
    }
    std::future::pending().await
}

/// Waits up to `grace` for the remaining tasks, then aborts the rest.
async fn drain(set: &mut JoinSet<Result<(), ControllerError>>, grace: Duration) {
    let drained = time::timeout(grace, async {
        while let Some(joined) = set.join_next().await {
            if let Ok(Err(err)) = joined {
                tracing::debug!(error = %err, "engine task failed during shutdown");
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            grace = ?grace,
            remaining = set.len(),
            "tasks did not stop within grace; aborting"
        );
        set.shutdown().await;
    }
}
