//! Queues feeding controller workers.
//!
//! - [`WorkQueue`] / [`RetryQueue`]: deduplicating queue of ready requests.
//! - [`DeferQueue`]: scheduler releasing requests into the work queue when
//!   their time comes.
//!
//! [`run_work_queue`] wires both together with an exponential rate limiter.

mod deferred;
mod heap;
mod work;

pub use deferred::DeferQueue;
pub use work::{RetryQueue, WorkQueue, run_work_queue};
