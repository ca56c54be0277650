//! # Deduplicating, retry-aware work queue.
//!
//! [`WorkQueue`] is what controller workers pull from. [`RetryQueue`] is the
//! default implementation; it composes a [`RateLimiter`] (for
//! `add_rate_limited`) and a [`DeferQueue`] (for `add_after`).
//!
//! ## State
//! ```text
//!            add(r)                          get()                     done(r)
//!  r ──► dirty ∪ {r} ──► queue (FIFO) ──► processing ∪ {r} ──► processing \ {r}
//!           │                                  ▲                       │
//!           └── r ∈ processing: wait for done ─┘       r ∈ dirty ──────┘ re-queue
//! ```
//!
//! ## Rules
//! - A request is in `queue` at most once.
//! - A request in `dirty` but not in `queue` is always in `processing`.
//! - A request is handed to at most one worker at a time.
//! - After the queue's token is cancelled `add` is a no-op, `get` keeps
//!   handing out what is already queued and then returns `None`.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerConfig;
use crate::policies::{ExponentialRateLimiter, RateLimiter};
use crate::queue::DeferQueue;
use crate::request::Request;

/// Upper bound for deadlines that would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// # Queue of requests waiting for a worker.
///
/// Implementations must be safe to share between worker tasks.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Waits for the next request.
    ///
    /// Returns `None` once the queue is shut down and drained; callers must
    /// stop calling `get` after that.
    async fn get(&self) -> Option<Request>;

    /// Marks `request` as pending and makes it available to `get`.
    fn add(&self, request: Request);

    /// Adds `request` after `delay`; a zero delay adds immediately.
    async fn add_after(&self, request: Request, delay: Duration);

    /// Adds `request` after the delay chosen by the rate limiter.
    async fn add_rate_limited(&self, request: Request);

    /// Resets the retry history of `request`.
    fn forget(&self, request: &Request);

    /// Releases `request` after a worker finished with it.
    fn done(&self, request: &Request);
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Request>,
    dirty: HashSet<Request>,
    processing: HashSet<Request>,
}

/// Default [`WorkQueue`] with rate-limited and delayed re-adds.
pub struct RetryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    token: CancellationToken,
    deferred: Arc<DeferQueue>,
    limiter: Arc<dyn RateLimiter>,
}

impl RetryQueue {
    /// Creates the queue and spawns its defer task.
    ///
    /// Everything stops when `token` is cancelled. Must be called inside a
    /// tokio runtime.
    pub fn start(
        token: CancellationToken,
        limiter: Arc<dyn RateLimiter>,
        defer_capacity: usize,
        heartbeat: Duration,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            token: token.clone(),
            deferred: Arc::new(DeferQueue::new(defer_capacity, heartbeat)),
            limiter,
        });

        let weak: Weak<Self> = Arc::downgrade(&queue);
        let deferred = Arc::clone(&queue.deferred);
        tokio::spawn(async move {
            let res = deferred
                .process(token, move |request| {
                    if let Some(queue) = weak.upgrade() {
                        queue.add(request);
                    }
                })
                .await;
            if let Err(err) = res {
                tracing::error!(error = %err, "defer queue task failed");
            }
        });

        queue
    }

    /// Returns the number of requests ready for `get`.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no request is ready for `get`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[async_trait]
impl WorkQueue for RetryQueue {
    async fn get(&self) -> Option<Request> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.state.lock();
                if let Some(request) = st.queue.pop_front() {
                    st.dirty.remove(&request);
                    st.processing.insert(request.clone());
                    return Some(request);
                }
            }

            if self.is_shutting_down() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.token.cancelled() => {}
            }
        }
    }

    fn add(&self, request: Request) {
        if self.is_shutting_down() {
            return;
        }
        {
            let mut st = self.state.lock();
            if st.dirty.contains(&request) {
                return;
            }
            st.dirty.insert(request.clone());
            if st.processing.contains(&request) {
                return;
            }
            st.queue.push_back(request);
        }
        self.notify.notify_one();
    }

    async fn add_after(&self, request: Request, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(request);
            return;
        }
        let now = Instant::now();
        let ready_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.deferred.defer(&self.token, request, ready_at).await;
    }

    async fn add_rate_limited(&self, request: Request) {
        let delay = self.limiter.next_retry(&request);
        self.add_after(request, delay).await;
    }

    fn forget(&self, request: &Request) {
        self.limiter.forget(request);
    }

    fn done(&self, request: &Request) {
        {
            let mut st = self.state.lock();
            st.processing.remove(request);
            if !st.dirty.contains(request) {
                return;
            }
            st.queue.push_back(request.clone());
        }
        self.notify.notify_one();
    }
}

/// Builds the default work queue for a controller run.
///
/// The queue uses an [`ExponentialRateLimiter`] with `config.backoff` and
/// shuts down when `token` is cancelled.
pub fn run_work_queue(token: CancellationToken, config: &ControllerConfig) -> Arc<dyn WorkQueue> {
    let limiter = Arc::new(ExponentialRateLimiter::new(config.backoff));
    RetryQueue::start(
        token,
        limiter,
        config.defer_capacity_clamped(),
        config.heartbeat_clamped(),
    )
}
