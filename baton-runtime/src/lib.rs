//! Baton Runtime - distributed orchestration engine
//!
//! Worker processes sharing a [`Broker`] cooperate to fire each cron tick
//! once across the fleet, deliver ad hoc executions immediately or after a
//! delay, and redeliver executions whose handler did not acknowledge them
//! within their retry window.

mod broker;
mod config;
mod cron;
mod error;
mod execution;
mod handler;
mod lifecycle;
mod registry;
mod scheduler;
mod task;
mod time_unit;

// Re-export public API
pub use broker::{Broker, DelayedPoll, MemoryBroker, RedisBroker};
pub use self::config::{load_toml_config, load_yaml_config, resolve_config_value, SchedulerConfig};
pub use self::cron::CronSchedule;
pub use error::{BoxError, SchedulerError, SchedulerResult};
pub use execution::{tick_execution_id, Delivery, Execution, ExecutionBuilder, PushOptions};
pub use handler::{Handler, HandlerFuture, HandlerResult};
pub use lifecycle::State;
pub use linkme;
pub use registry::TASKS;
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use task::{ScheduleOptions, TaskDefinition, TaskDefinitionBuilder};
pub use time_unit::{parse_duration_str, TimeUnit};
