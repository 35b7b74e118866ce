//! Execution records and the builder that turns a caller's intent into one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};

/// One concrete invocation attempt of a task.
///
/// Immutable once built. A retry is a new delivery of the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    task_id: String,
    execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default)]
    retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_timeout_ms: Option<u64>,
}

impl Execution {
    /// Ad hoc execution with a random id.
    pub fn builder(task_id: impl Into<String>) -> ExecutionBuilder {
        ExecutionBuilder {
            task_id: task_id.into(),
            options: PushOptions::default(),
        }
    }

    /// Execution for one cron tick. Every process computing the same tick of
    /// the same task derives the same id.
    pub fn for_tick(task_id: &str, fire_at: DateTime<Utc>, retry: bool, retry_timeout: Option<Duration>) -> Self {
        Self {
            task_id: task_id.to_string(),
            execution_id: tick_execution_id(task_id, fire_at),
            data: None,
            retry,
            retry_timeout_ms: retry_timeout.map(duration_millis),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn retry_timeout(&self) -> Option<Duration> {
        self.retry_timeout_ms.map(Duration::from_millis)
    }

    /// Deadline of the retry-timeout entry armed at `now`, if retry is enabled.
    pub fn retry_deadline(&self, now: DateTime<Utc>, default_timeout: Duration) -> SchedulerResult<Option<DateTime<Utc>>> {
        if !self.retry {
            return Ok(None);
        }
        let timeout = self.retry_timeout().unwrap_or(default_timeout);
        check_retry_timeout(timeout)?;
        offset(now, timeout).map(Some)
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> SchedulerResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Composite `task_id:fire_at_millis` key for a cron tick.
pub fn tick_execution_id(task_id: &str, fire_at: DateTime<Utc>) -> String {
    format!("{}:{}", task_id, fire_at.timestamp_millis())
}

/// `now + duration`, or `InvalidDuration` past the representable range.
pub(crate) fn offset(now: DateTime<Utc>, duration: Duration) -> SchedulerResult<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| SchedulerError::InvalidDuration(format!("{duration:?} is out of range")))
}

/// A zero retry window would redeliver before the first attempt could answer.
pub(crate) fn check_retry_timeout(timeout: Duration) -> SchedulerResult<()> {
    if timeout.is_zero() {
        return Err(SchedulerError::InvalidDuration("retry timeout must be greater than zero".into()));
    }
    Ok(())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Options of an ad hoc push.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub data: Option<String>,
    pub delay: Option<Duration>,
    pub retry: bool,
    pub retry_timeout: Option<Duration>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the retry window and enables retry.
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry = true;
        self.retry_timeout = Some(timeout);
        self
    }
}

/// Where a freshly built execution goes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Immediate(Execution),
    Delayed {
        due_at: DateTime<Utc>,
        execution: Execution,
    },
}

impl Delivery {
    pub fn execution(&self) -> &Execution {
        match self {
            Delivery::Immediate(execution) => execution,
            Delivery::Delayed { execution, .. } => execution,
        }
    }
}

/// Builder for ad hoc executions
pub struct ExecutionBuilder {
    task_id: String,
    options: PushOptions,
}

impl ExecutionBuilder {
    pub fn options(mut self, options: PushOptions) -> Self {
        self.options = options;
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.options = self.options.data(data);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.options = self.options.delay(delay);
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.options = self.options.retry(retry);
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.retry_timeout(timeout);
        self
    }

    /// Build the execution with a fresh id. A missing or zero delay means
    /// immediate delivery, anything else is due at `now + delay`.
    ///
    /// Fails with `InvalidDuration` for a zero retry timeout or a delay that
    /// does not fit in a timestamp.
    pub fn build(self, now: DateTime<Utc>) -> SchedulerResult<Delivery> {
        let PushOptions {
            data,
            delay,
            retry,
            retry_timeout,
        } = self.options;
        if let Some(timeout) = retry_timeout {
            check_retry_timeout(timeout)?;
        }

        let execution = Execution {
            task_id: self.task_id,
            execution_id: Uuid::new_v4().to_string(),
            data,
            retry,
            retry_timeout_ms: retry_timeout.map(duration_millis),
        };

        match delay.filter(|d| !d.is_zero()) {
            None => Ok(Delivery::Immediate(execution)),
            Some(delay) => Ok(Delivery::Delayed {
                due_at: offset(now, delay)?,
                execution,
            }),
        }
    }
}
