//! Coordination store shared by every scheduler process.
//!
//! The control loops talk to each other only through a [`Broker`]: ready
//! queues per task id, one time-ordered delayed index, and an atomic
//! lock-and-record primitive used to elect a single winner per cron tick.

mod memory;
mod redis_broker;

pub use self::memory::MemoryBroker;
pub use self::redis_broker::RedisBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::SchedulerResult;
use crate::execution::Execution;

/// Result of looking at the head of the delayed index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayedPoll {
    /// Nothing is parked.
    Empty,
    /// The earliest entry is due at this instant; it was not popped.
    Pending(DateTime<Utc>),
    /// The earliest entry was due and has been popped for this caller alone.
    /// A retrying execution stays parked under its next deadline.
    Due(Execution),
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append to the ready queue of `execution.task_id()`.
    async fn enqueue_ready(&self, execution: &Execution) -> SchedulerResult<()>;

    /// Pop the first execution available across `task_ids`, waiting at most
    /// `timeout`. `None` when the wait elapsed.
    async fn dequeue_ready(&self, task_ids: &[String], timeout: Duration) -> SchedulerResult<Option<Execution>>;

    /// Pop the earliest delayed entry if it is due at `now`, otherwise report
    /// when it will be.
    ///
    /// When the popped execution has retry enabled, it is parked again in the
    /// same atomic step at `now` plus its retry timeout (`default_retry_timeout`
    /// when it has none), so every delivery is backed by a live entry.
    async fn poll_delayed(&self, now: DateTime<Utc>, default_retry_timeout: Duration) -> SchedulerResult<DelayedPoll>;

    /// Park `execution` in the delayed index until `due_at`. Parking an id that
    /// is already parked moves its deadline.
    async fn enqueue_delayed(&self, due_at: DateTime<Utc>, execution: &Execution) -> SchedulerResult<()>;

    /// Test-and-set the lock keyed by `execution.execution_id()` for `guard`.
    /// On acquisition, also parks the execution until `retry_deadline` when
    /// one is given, arming its retry-timeout entry.
    async fn lock_and_record(
        &self,
        execution: &Execution,
        guard: Duration,
        retry_deadline: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool>;

    /// Remove the delayed entry of `execution_id`; no-op when absent.
    async fn clear_pending(&self, execution_id: &str) -> SchedulerResult<()>;

    /// Whether `execution_id` still has a delayed entry. A retrying execution
    /// without one was already acknowledged.
    async fn is_pending(&self, execution_id: &str) -> SchedulerResult<bool>;
}
