//! Error types used by the reconciliation engine and by reconcilers.
//!
//! This module defines:
//!
//! - [`ReconcileError`] - outcome of a failed reconciliation; drives the retry policy.
//! - [`ControllerError`] - whole-engine failures returned from [`Controller::run`](crate::Controller::run).
//! - [`SourceError`] - failures reported by an event [`Subscription`](crate::Subscription).
//! - [`QueueError`] - misuse of a [`DeferQueue`](crate::DeferQueue).
//!
//! All of them provide `as_label` for logs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::events::Topic;

/// # Errors returned by a [`Reconciler`](crate::Reconciler).
///
/// The variant decides how the request is rescheduled:
/// - [`ReconcileError::RequeueAfter`] is honored verbatim and does not escalate backoff;
/// - every other variant goes through the rate limiter.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Retry after exactly `after` (zero means "as soon as possible").
    #[error("requeue after {after:?}")]
    RequeueAfter {
        /// Delay before the request becomes ready again.
        after: Duration,
    },

    /// Reconciliation failed; retried with exponential backoff.
    #[error("reconciliation failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The reconciler panicked; retried like [`ReconcileError::Fail`].
    #[error("reconciler panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl ReconcileError {
    /// Requests a retry after `after`, bypassing backoff.
    pub fn requeue_after(after: Duration) -> Self {
        ReconcileError::RequeueAfter { after }
    }

    /// Requests an immediate retry, bypassing backoff.
    pub fn requeue_now() -> Self {
        Self::requeue_after(Duration::ZERO)
    }

    /// Wraps any displayable error as a generic failure.
    pub fn fail(error: impl fmt::Display) -> Self {
        ReconcileError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use reconcile_engine::ReconcileError;
    ///
    /// assert_eq!(ReconcileError::requeue_now().as_label(), "reconcile_requeue");
    /// assert_eq!(ReconcileError::fail("boom").as_label(), "reconcile_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconcileError::RequeueAfter { .. } => "reconcile_requeue",
            ReconcileError::Fail { .. } => "reconcile_failed",
            ReconcileError::Panicked { .. } => "reconcile_panicked",
        }
    }

    /// Returns the explicit delay if this is a requeue request.
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            ReconcileError::RequeueAfter { after } => Some(*after),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        ReconcileError::Fail {
            error: format!("{err:#}"),
        }
    }
}

/// # Errors reported by an event subscription.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SourceError {
    /// The caller's cancellation token fired while waiting.
    #[error("subscription canceled")]
    Canceled,

    /// The subscription was closed by the source or by `unsubscribe`.
    #[error("subscription closed")]
    Closed,

    /// The subscriber fell behind and events were dropped.
    #[error("subscriber lagged; {skipped} events skipped")]
    Lagged {
        /// Number of events that were skipped.
        skipped: u64,
    },

    /// Any other failure of the event source.
    #[error("event source failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl SourceError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Canceled => "source_canceled",
            SourceError::Closed => "source_closed",
            SourceError::Lagged { .. } => "source_lagged",
            SourceError::Failed(_) => "source_failed",
        }
    }
}

/// # Errors that abort a controller run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Opening a subscription failed.
    #[error("subscribe to topic {topic} failed: {source}")]
    Subscribe {
        /// Topic of the subscription.
        topic: Topic,
        /// Error from the event source.
        #[source]
        source: anyhow::Error,
    },

    /// Reading from an open subscription failed.
    #[error("subscription to topic {topic} failed: {source}")]
    Subscription {
        /// Topic of the subscription.
        topic: Topic,
        /// Error from the subscription.
        #[source]
        source: SourceError,
    },

    /// An event carried a payload that cannot be mapped to requests.
    #[error("unsupported payload {payload:?} on topic {topic}")]
    UnsupportedPayload {
        /// Topic of the subscription.
        topic: Topic,
        /// Payload type description.
        payload: String,
    },

    /// An engine task panicked outside of a reconciler.
    #[error("engine task panicked: {task}")]
    TaskPanicked {
        /// Name of the task.
        task: String,
    },
}

impl ControllerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControllerError::Subscribe { .. } => "controller_subscribe_failed",
            ControllerError::Subscription { .. } => "controller_subscription_failed",
            ControllerError::UnsupportedPayload { .. } => "controller_unsupported_payload",
            ControllerError::TaskPanicked { .. } => "controller_task_panicked",
        }
    }
}

/// # Errors produced by queue primitives.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// [`DeferQueue::process`](crate::DeferQueue::process) was already started.
    #[error("defer queue is already being processed")]
    AlreadyProcessing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_delay() {
        assert_eq!(
            ReconcileError::requeue_after(Duration::from_secs(3)).requeue_delay(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(ReconcileError::requeue_now().requeue_delay(), Some(Duration::ZERO));
        assert_eq!(ReconcileError::fail("x").requeue_delay(), None);
    }

    #[test]
    fn test_from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("writing bound gateway");
        let err = ReconcileError::from(err);
        assert_eq!(err.as_label(), "reconcile_failed");
        assert_eq!(
            err.to_string(),
            "reconciliation failed: writing bound gateway: disk full"
        );
    }

    #[test]
    fn test_controller_error_display() {
        let err = ControllerError::Subscription {
            topic: Topic::new("http-route"),
            source: SourceError::Lagged { skipped: 4 },
        };
        assert_eq!(err.as_label(), "controller_subscription_failed");
        assert_eq!(
            err.to_string(),
            "subscription to topic http-route failed: subscriber lagged; 4 events skipped"
        );
    }
}
