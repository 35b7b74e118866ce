use std::time::Duration;

use crate::handler::HandlerFuture;

/// Recurring schedule bound to a task id at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub cron_expr: String,
    pub retry: bool,
    pub retry_timeout: Option<Duration>,
}

impl ScheduleOptions {
    pub fn new(cron_expr: impl Into<String>) -> Self {
        Self {
            cron_expr: cron_expr.into(),
            retry: false,
            retry_timeout: None,
        }
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

/// Task declared with the `#[task]` attribute.
///
/// String fields may hold `${key}` / `${key:default}` placeholders resolved
/// against the application config when the task is registered.
#[derive(Debug, Clone, Copy)]
pub struct TaskDefinition {
    pub id: &'static str,
    /// Empty when the task is only bound for ad hoc pushes.
    pub cron: &'static str,
    pub retry: &'static str,
    pub retry_timeout: &'static str,
    pub enabled: &'static str,
    pub handler: fn(Option<String>) -> HandlerFuture<'static>,
}

impl TaskDefinition {
    /// Create a new builder for TaskDefinition
    pub fn builder(id: &'static str, handler: fn(Option<String>) -> HandlerFuture<'static>) -> TaskDefinitionBuilder {
        TaskDefinitionBuilder {
            id,
            cron: "",
            retry: "false",
            retry_timeout: "",
            enabled: "true",
            handler,
        }
    }
}

/// Builder for TaskDefinition
pub struct TaskDefinitionBuilder {
    id: &'static str,
    cron: &'static str,
    retry: &'static str,
    retry_timeout: &'static str,
    enabled: &'static str,
    handler: fn(Option<String>) -> HandlerFuture<'static>,
}

impl TaskDefinitionBuilder {
    pub fn cron(mut self, cron: &'static str) -> Self {
        self.cron = cron;
        self
    }

    pub fn retry(mut self, retry: &'static str) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_timeout(mut self, retry_timeout: &'static str) -> Self {
        self.retry_timeout = retry_timeout;
        self
    }

    pub fn enabled(mut self, enabled: &'static str) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> TaskDefinition {
        TaskDefinition {
            id: self.id,
            cron: self.cron,
            retry: self.retry,
            retry_timeout: self.retry_timeout,
            enabled: self.enabled,
            handler: self.handler,
        }
    }
}
