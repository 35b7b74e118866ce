//! # Baton - distributed task scheduling over a shared broker
//!
//! Run the same code in several processes pointed at one broker and they
//! cooperate without a coordinator:
//!
//! - **Cron tasks** fire once per tick across the whole fleet
//! - **Ad hoc tasks** are pushed for immediate or delayed delivery
//! - **Retries** happen automatically when a handler fails or never answers
//!   within the execution's retry window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use baton::{task, BoxError, PushOptions, SchedulerBuilder};
//! use std::time::Duration;
//!
//! #[task(cron = "0 */5 * * * *", retry_timeout = "1m")]
//! async fn cleanup(_data: Option<String>) -> Result<bool, BoxError> {
//!     println!("This runs every 5 minutes, once across all workers");
//!     Ok(true)
//! }
//!
//! #[task(id = "welcome-mail")]
//! async fn welcome_mail(data: Option<String>) -> Result<bool, BoxError> {
//!     println!("Sending welcome mail to {:?}", data);
//!     Ok(true)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scheduler = SchedulerBuilder::with_toml("config/application.toml")?
//!         .connect_redis()
//!         .await?
//!         .register_all()
//!         .build()?;
//!     scheduler.start()?;
//!
//!     scheduler
//!         .push(
//!             "welcome-mail",
//!             PushOptions::new()
//!                 .data("ada@example.com")
//!                 .delay(Duration::from_secs(10))
//!                 .retry_timeout(Duration::from_secs(30)),
//!         )
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Create `config/application.toml`:
//!
//! ```toml
//! [scheduler]
//! redis_url = "redis://127.0.0.1/"
//! key_prefix = "baton"
//! lock_guard = "1s"
//! poll_interval = "1s"
//! dequeue_timeout = "1s"
//! default_retry_timeout = "60s"
//!
//! [app]
//! cleanup_cron = "0 */5 * * * *"
//! ```
//!
//! Task parameters can reference the file with `${app.cleanup_cron}`, and
//! every key can be overridden by an environment variable with the `APP_`
//! prefix.

// Re-export macros
pub use baton_macro::task;

// Re-export core types
pub use baton_runtime::{
    Broker, BoxError, CronSchedule, DelayedPoll, Execution, Handler, HandlerFuture, HandlerResult,
    MemoryBroker, PushOptions, RedisBroker, ScheduleOptions, Scheduler, SchedulerBuilder,
    SchedulerConfig, SchedulerError, SchedulerResult, State, TimeUnit,
};

// Make baton_runtime available for macro expansion
pub use baton_runtime;
