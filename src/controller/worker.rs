//! # Worker loop: one reconciliation at a time.
//!
//! ```text
//! while let Some(r) = queue.get():
//!     res = catch_unwind(reconciler.reconcile(ctx, r))
//!     Ok                 → forget(r)
//!     RequeueAfter(d)    → forget(r); add_after(r, d)
//!     Panicked / Fail    → add_rate_limited(r)
//!     done(r)
//! ```
//!
//! ## Rules
//! - A panicking reconciler never takes the worker down; the panic becomes
//!   [`ReconcileError::Panicked`] and is retried with backoff.
//! - An explicit requeue never escalates backoff.
//! - `done` is called for every request handed out by `get`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;
use crate::queue::WorkQueue;
use crate::reconcile::ReconcilerRef;
use crate::request::Request;

/// Pulls requests from `queue` until it reports shutdown.
pub(crate) async fn run_worker(
    id: usize,
    queue: Arc<dyn WorkQueue>,
    reconciler: ReconcilerRef,
    ctx: CancellationToken,
) {
    tracing::trace!(worker = id, "worker started");
    while let Some(request) = queue.get().await {
        let res = reconcile_once(&reconciler, ctx.clone(), request.clone()).await;
        apply_retry_policy(queue.as_ref(), &request, res).await;
        queue.done(&request);
    }
    tracing::trace!(worker = id, "worker stopped");
}

/// Runs one reconciliation behind a panic barrier.
async fn reconcile_once(
    reconciler: &ReconcilerRef,
    ctx: CancellationToken,
    request: Request,
) -> Result<(), ReconcileError> {
    let reconciler = Arc::clone(reconciler);
    let fut = async move { reconciler.reconcile(ctx, request).await };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(ReconcileError::Panicked {
            message: panic_message(panic.as_ref()),
        }),
    }
}

async fn apply_retry_policy(
    queue: &dyn WorkQueue,
    request: &Request,
    res: Result<(), ReconcileError>,
) {
    match res {
        Ok(()) => {
            tracing::trace!(request = %request, "reconciled");
            queue.forget(request);
        }
        Err(ReconcileError::RequeueAfter { after }) => {
            tracing::debug!(request = %request, after = ?after, "requeue requested");
            queue.forget(request);
            queue.add_after(request.clone(), after).await;
        }
        Err(err @ ReconcileError::Panicked { .. }) => {
            tracing::error!(
                request = %request,
                error = %err,
                label = err.as_label(),
                "reconciler panicked"
            );
            queue.add_rate_limited(request.clone()).await;
        }
        Err(err) => {
            tracing::warn!(
                request = %request,
                error = %err,
                label = err.as_label(),
                "reconcile failed"
            );
            queue.add_rate_limited(request.clone()).await;
        }
    }
}

/// Renders a panic payload as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::reconcile::ReconcilerFn;

    #[derive(Debug, PartialEq)]
    enum Call {
        Forget,
        AddAfter(Duration),
        AddRateLimited,
        Done,
    }

    /// Hands out a fixed list once and records what the worker does.
    struct Script {
        pending: Mutex<Vec<Request>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Script {
        fn new(requests: Vec<Request>) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(requests.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WorkQueue for Script {
        async fn get(&self) -> Option<Request> {
            self.pending.lock().pop()
        }
        fn add(&self, _request: Request) {}
        async fn add_after(&self, _request: Request, delay: Duration) {
            self.calls.lock().push(Call::AddAfter(delay));
        }
        async fn add_rate_limited(&self, _request: Request) {
            self.calls.lock().push(Call::AddRateLimited);
        }
        fn forget(&self, _request: &Request) {
            self.calls.lock().push(Call::Forget);
        }
        fn done(&self, _request: &Request) {
            self.calls.lock().push(Call::Done);
        }
    }

    async fn run_script(names: &[&str]) -> Vec<Call> {
        let queue = Script::new(names.iter().map(|n| Request::new("k", *n)).collect());
        let reconciler: ReconcilerRef =
            ReconcilerFn::arc(|_ctx: CancellationToken, req: Request| async move {
                match req.name.as_str() {
                    "ok" => Ok(()),
                    "requeue" => Err(ReconcileError::requeue_after(Duration::from_secs(7))),
                    "fail" => Err(ReconcileError::fail("backend unavailable")),
                    "panic" => panic!("reconciler bug"),
                    other => panic!("unexpected {other}"),
                }
            });
        run_worker(0, queue.clone(), reconciler, CancellationToken::new()).await;
        std::mem::take(&mut *queue.calls.lock())
    }

    #[tokio::test]
    async fn test_success_forgets() {
        assert_eq!(run_script(&["ok"]).await, vec![Call::Forget, Call::Done]);
    }

    #[tokio::test]
    async fn test_requeue_forgets_and_adds_after() {
        assert_eq!(
            run_script(&["requeue"]).await,
            vec![Call::Forget, Call::AddAfter(Duration::from_secs(7)), Call::Done]
        );
    }

    #[tokio::test]
    async fn test_failure_is_rate_limited() {
        assert_eq!(
            run_script(&["fail"]).await,
            vec![Call::AddRateLimited, Call::Done]
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_worker_continues() {
        assert_eq!(
            run_script(&["panic", "ok"]).await,
            vec![Call::AddRateLimited, Call::Done, Call::Forget, Call::Done]
        );
    }

    #[tokio::test]
    async fn test_panic_message_is_captured() {
        let reconciler: ReconcilerRef =
            ReconcilerFn::arc(|_ctx: CancellationToken, req: Request| async move {
                if !req.name.is_empty() {
                    panic!("cannot bind {}", req.name);
                }
                Ok::<(), ReconcileError>(())
            });
        let err = reconcile_once(&reconciler, CancellationToken::new(), Request::new("k", "gw"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Panicked { ref message } if message == "cannot bind gw"
        ));
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
