use thiserror::Error;

/// Error type returned by handlers. Any error can be boxed into it with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot {operation} while the scheduler is running")]
    Running { operation: &'static str },
    #[error("invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn running(operation: &'static str) -> Self {
        Self::Running { operation }
    }

    pub fn broker<S: Into<String>>(msg: S) -> Self {
        Self::Broker(msg.into())
    }

    /// Whether a loop may retry the failed operation after a back-off.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Broker(_) | SchedulerError::Redis(_))
    }
}
