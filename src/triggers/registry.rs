//! # Trigger registry.
//!
//! Keeps at most one trigger per [`Request`] and, once attached to a running
//! controller, one watch task per trigger.
//!
//! ## Architecture
//! ```text
//! add(r, t)    ─► cancel old slot for r (if any) ─► insert slot ─► spawn watch (if attached)
//! remove(r)    ─► cancel + drop slot
//! attach(q, c) ─► spawn watch for every slot, child tokens of c
//! stop()       ─► detach, cancel all, join all
//!
//! watch(r, t):
//!   loop {
//!     select(cancelled → exit, t.wait(ctx) → Ok | Err)
//!     lock registry; if cancelled → exit; queue.add(r)
//!     select(cancelled → exit, sleep(REARM_DELAY))
//!   }
//! ```
//!
//! ## Rules
//! - Registry owns the slot handles (JoinHandle + CancellationToken).
//! - Cancel and enqueue both happen under the registry lock, so once `add`
//!   (supersede) or `remove` returns the old trigger never enqueues again.
//! - Watches re-arm after `REARM_DELAY`, so a trigger whose wait is always
//!   ready cannot monopolize a worker thread.
//! - Triggers added before `attach` are held and started on attach.
//! - After `stop` the registry keeps no tasks; triggers added later wait for
//!   the next `attach`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::queue::WorkQueue;
use crate::request::Request;
use crate::triggers::TriggerRef;

/// Pause between a fire and the next wait.
const REARM_DELAY: Duration = Duration::from_millis(1);

/// Registered trigger.
struct Slot {
    trigger: TriggerRef,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

/// Where watch tasks run and what they feed.
struct Attached {
    queue: Arc<dyn WorkQueue>,
    token: CancellationToken,
    runtime: Handle,
    span: Span,
}

#[derive(Default)]
struct State {
    slots: HashMap<Request, Slot>,
    attached: Option<Attached>,
}

/// Registry of triggers keyed by request.
#[derive(Default)]
pub(crate) struct TriggerRegistry {
    state: Arc<Mutex<State>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `trigger` for `request`, superseding any previous one.
    pub fn add(&self, request: Request, trigger: TriggerRef) {
        let mut st = self.state.lock();
        if let Some(old) = st.slots.remove(&request) {
            old.cancel.cancel();
            tracing::debug!(request = %request, "trigger superseded");
        }

        let mut slot = Slot {
            trigger,
            cancel: CancellationToken::new(),
            join: None,
        };
        if let Some(attached) = &st.attached {
            self.spawn_watch(attached, &request, &mut slot);
        }
        st.slots.insert(request, slot);
    }

    /// Removes the trigger for `request`; returns false if there was none.
    pub fn remove(&self, request: &Request) -> bool {
        let removed = self.state.lock().slots.remove(request);
        match removed {
            Some(slot) => {
                slot.cancel.cancel();
                tracing::debug!(request = %request, "trigger removed");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Starts watching every registered trigger, feeding `queue`.
    ///
    /// Watch tasks stop when `token` is cancelled or on [`stop`](Self::stop).
    /// Must be called inside a tokio runtime.
    pub fn attach(&self, queue: Arc<dyn WorkQueue>, token: CancellationToken) {
        let attached = Attached {
            queue,
            token,
            runtime: Handle::current(),
            span: Span::current(),
        };

        let mut st = self.state.lock();
        for (request, slot) in st.slots.iter_mut() {
            self.spawn_watch(&attached, request, slot);
        }
        st.attached = Some(attached);
    }

    /// Detaches from the controller, cancels all watch tasks and waits for them.
    pub async fn stop(&self) {
        let joins: Vec<JoinHandle<()>> = {
            let mut st = self.state.lock();
            st.attached = None;
            st.slots
                .values_mut()
                .filter_map(|slot| {
                    slot.cancel.cancel();
                    slot.join.take()
                })
                .collect()
        };

        for join in joins {
            if let Err(err) = join.await {
                if err.is_panic() {
                    tracing::warn!("trigger task panicked");
                }
            }
        }
    }

    fn spawn_watch(&self, attached: &Attached, request: &Request, slot: &mut Slot) {
        slot.cancel.cancel();
        slot.cancel = attached.token.child_token();

        let fut = watch(
            Arc::clone(&self.state),
            request.clone(),
            Arc::clone(&slot.trigger),
            Arc::clone(&attached.queue),
            slot.cancel.clone(),
        );
        slot.join = Some(attached.runtime.spawn(fut.instrument(attached.span.clone())));
    }
}

async fn watch(
    state: Arc<Mutex<State>>,
    request: Request,
    trigger: TriggerRef,
    queue: Arc<dyn WorkQueue>,
    cancel: CancellationToken,
) {
    tracing::debug!(request = %request, "trigger started");
    loop {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = trigger.wait(cancel.clone()) => res,
        };
        if let Err(err) = res {
            tracing::debug!(request = %request, error = %format!("{err:#}"), "trigger wait failed");
        }

        {
            let _guard = state.lock();
            if cancel.is_cancelled() {
                break;
            }
            queue.add(request.clone());
        }
        tracing::trace!(request = %request, "trigger fired");

        // a wait that resolves immediately must not starve the runtime
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = time::sleep(REARM_DELAY) => {}
        }
    }
    tracing::debug!(request = %request, "trigger stopped");
}
