//! # Time-ordered scheduling of not-yet-ready requests.
//!
//! [`DeferQueue`] holds requests until their ready time and then hands them
//! to a callback (normally [`RetryQueue::add`](crate::RetryQueue)).
//!
//! ## Architecture
//! ```text
//! defer(ctx, r, at) ──► [bounded mpsc] ──► process() task (sole owner of the heap)
//!                                             │
//!                                             ├─► pop every entry with ready_at <= now ─► callback(r)
//!                                             └─► wait for the first of:
//!                                                   - cancellation          → stop, drop heap
//!                                                   - new arrival           → schedule + drain burst
//!                                                   - next ready_at reached
//!                                                   - heartbeat tick
//! ```
//!
//! ## Rules
//! - The heap is touched only by the `process` task, so it needs no lock.
//! - One entry per request; scheduling it again can only move it **earlier**.
//! - `defer` on a cancelled context is a no-op.
//! - On cancellation pending entries are discarded, not delivered.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::queue::heap::{DeferHeap, Deferred};
use crate::request::Request;

/// Scheduler for requests that become ready in the future.
#[derive(Debug)]
pub struct DeferQueue {
    tx: mpsc::Sender<Deferred>,
    rx: Mutex<Option<mpsc::Receiver<Deferred>>>,
    heartbeat: Duration,
}

impl DeferQueue {
    /// Creates a queue accepting up to `capacity` (min 1) in-flight arrivals,
    /// re-checking the heap at least every `heartbeat` (min 1ms).
    pub fn new(capacity: usize, heartbeat: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            heartbeat: heartbeat.max(Duration::from_millis(1)),
        }
    }

    /// Schedules `request` to become ready at `ready_at`.
    ///
    /// Waits for room in the arrival channel; gives up silently if `ctx` is
    /// cancelled first. If `request` is already scheduled the earlier of the
    /// two times is kept.
    pub async fn defer(&self, ctx: &CancellationToken, request: Request, ready_at: Instant) {
        let entry = Deferred { request, ready_at };
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {}
            res = self.tx.send(entry) => {
                if res.is_err() {
                    tracing::trace!("defer queue stopped; entry dropped");
                }
            }
        }
    }

    /// Runs the scheduling loop until `ctx` is cancelled.
    ///
    /// Must be driven by exactly one task; a second call returns
    /// [`QueueError::AlreadyProcessing`].
    pub async fn process<F>(&self, ctx: CancellationToken, mut deliver: F) -> Result<(), QueueError>
    where
        F: FnMut(Request) + Send,
    {
        let mut rx = self.rx.lock().take().ok_or(QueueError::AlreadyProcessing)?;
        let mut heap = DeferHeap::new();

        let mut heartbeat = time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = Instant::now();
            while let Some(entry) = heap.pop_ready(now) {
                deliver(entry.request);
            }

            let next_ready = heap.next_ready_at();
            let wait_next = async move {
                match next_ready {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(entry) => {
                        heap.schedule(entry);
                        while let Ok(entry) = rx.try_recv() {
                            heap.schedule(entry);
                        }
                    }
                    None => break,
                },
                _ = wait_next => {}
                _ = heartbeat.tick() => {}
            }
        }

        if !heap.is_empty() {
            tracing::debug!(discarded = heap.len(), "defer queue stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn req(name: &str) -> Request {
        Request::new("k", name)
    }

    fn start(ctx: &CancellationToken) -> (Arc<DeferQueue>, UnboundedReceiver<(Request, Instant)>) {
        let queue = Arc::new(DeferQueue::new(16, Duration::from_secs(10)));
        let (tx, rx) = mpsc::unbounded_channel();
        let q = Arc::clone(&queue);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            q.process(ctx, move |r| {
                let _ = tx.send((r, Instant::now()));
            })
            .await
        });
        (queue, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_ready_order_at_ready_time() {
        let ctx = CancellationToken::new();
        let (queue, mut rx) = start(&ctx);
        let t0 = Instant::now();

        queue.defer(&ctx, req("late"), t0 + Duration::from_millis(30)).await;
        queue.defer(&ctx, req("early"), t0 + Duration::from_millis(10)).await;
        queue.defer(&ctx, req("mid"), t0 + Duration::from_millis(20)).await;

        let (r, at) = rx.recv().await.unwrap();
        assert_eq!(r, req("early"));
        assert!(at >= t0 + Duration::from_millis(10));
        assert_eq!(rx.recv().await.unwrap().0, req("mid"));
        assert_eq!(rx.recv().await.unwrap().0, req("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_time_wins_in_either_order() {
        let ctx = CancellationToken::new();
        let (queue, mut rx) = start(&ctx);
        let t0 = Instant::now();

        queue.defer(&ctx, req("a"), t0 + Duration::from_millis(500)).await;
        queue.defer(&ctx, req("a"), t0 + Duration::from_millis(100)).await;
        queue.defer(&ctx, req("b"), t0 + Duration::from_millis(100)).await;
        queue.defer(&ctx, req("b"), t0 + Duration::from_millis(500)).await;

        let mut got = Vec::new();
        for _ in 0..2 {
            let (r, at) = rx.recv().await.unwrap();
            assert!(at < t0 + Duration::from_millis(500), "{r} delivered late");
            got.push(r.name);
        }
        got.sort();
        assert_eq!(got, vec!["a", "b"]);

        // no duplicate delivery at the later time
        time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_delivers_immediately() {
        let ctx = CancellationToken::new();
        let (queue, mut rx) = start(&ctx);
        let t0 = Instant::now();

        queue.defer(&ctx, req("a"), t0).await;
        let (r, at) = rx.recv().await.unwrap();
        assert_eq!(r, req("a"));
        assert_eq!(at, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_on_cancelled_context_is_noop() {
        let ctx = CancellationToken::new();
        let (queue, mut rx) = start(&ctx);

        let caller = CancellationToken::new();
        caller.cancel();
        queue.defer(&caller, req("a"), Instant::now()).await;

        time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_entries() {
        let ctx = CancellationToken::new();
        let (queue, mut rx) = start(&ctx);

        queue.defer(&ctx, req("a"), Instant::now() + Duration::from_secs(5)).await;
        time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        // the callback (and with it the sender) is dropped when process returns
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_second_process_call_fails() {
        let ctx = CancellationToken::new();
        let queue = Arc::new(DeferQueue::new(1, Duration::from_secs(1)));
        let q = Arc::clone(&queue);
        let first = tokio::spawn({
            let ctx = ctx.clone();
            async move { q.process(ctx, |_| {}).await }
        });
        tokio::task::yield_now().await;

        // whichever call takes the receiver second must fail
        let second = queue.process(ctx.clone(), |_| {}).await;
        ctx.cancel();
        let first = first.await.unwrap();
        assert!(
            matches!(
                (first, second),
                (Ok(()), Err(QueueError::AlreadyProcessing))
                    | (Err(QueueError::AlreadyProcessing), Ok(()))
            )
        );
    }
}
