//! The three control loops of a running scheduler.
//!
//! Loops share nothing but the broker, the frozen registry and the stop
//! signal. Each one re-checks the signal after every wake-up.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, DelayedPoll};
use crate::config::SchedulerConfig;
use crate::error::SchedulerResult;
use crate::execution::Execution;
use crate::lifecycle::StopSignal;
use crate::registry::{Registry, ScheduleEntry};

#[derive(Clone)]
pub(crate) struct LoopContext {
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) config: Arc<SchedulerConfig>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) stop: StopSignal,
}

/// Fires one execution per tick of `entry` across the whole fleet.
pub(crate) async fn cron_loop(task_id: String, entry: ScheduleEntry, ctx: LoopContext) {
    let LoopContext {
        broker,
        config,
        mut stop,
        ..
    } = ctx;
    info!(task_id = %task_id, cron = entry.cron.expr(), "Cron loop started");

    let mut baseline = Utc::now();
    while !stop.is_stopped() {
        let Some(fire_at) = entry.cron.next_after(baseline) else {
            info!(task_id = %task_id, "Cron schedule exhausted");
            break;
        };
        if !stop.sleep_until(instant_at(fire_at)).await {
            break;
        }

        let execution = Execution::for_tick(
            &task_id,
            fire_at,
            entry.options.retry,
            entry.options.retry_timeout,
        );
        let retry_deadline = match execution.retry_deadline(Utc::now(), config.default_retry_timeout) {
            Ok(deadline) => deadline,
            Err(e) => {
                error!(task_id = %task_id, error = %e, %fire_at, "Tick skipped");
                baseline = fire_at;
                continue;
            }
        };

        let won = with_retry(&mut stop, config.broker_retry_delay, "lock_and_record", || {
            broker.lock_and_record(&execution, config.lock_guard, retry_deadline)
        })
        .await;

        match won {
            Some(true) => {
                let queued = with_retry(&mut stop, config.broker_retry_delay, "enqueue_ready", || {
                    broker.enqueue_ready(&execution)
                })
                .await;
                if queued.is_some() {
                    debug!(task_id = %task_id, execution_id = execution.execution_id(), %fire_at, "Tick won, execution queued");
                }
            }
            Some(false) => {
                debug!(task_id = %task_id, execution_id = execution.execution_id(), %fire_at, "Tick already taken by another process");
            }
            None => {}
        }

        baseline = fire_at;
    }

    info!(task_id = %task_id, "Cron loop exited");
}

/// Moves due entries of the delayed index into their ready queues. This
/// covers delayed pushes and retry-timeout redelivery alike.
pub(crate) async fn delay_loop(ctx: LoopContext) {
    let LoopContext {
        broker,
        config,
        mut stop,
        ..
    } = ctx;
    info!("Delay loop started");

    while !stop.is_stopped() {
        let polled = match broker.poll_delayed(Utc::now(), config.default_retry_timeout).await {
            Ok(polled) => polled,
            Err(e) => {
                warn!(error = %e, "Polling the delayed index failed");
                if !stop.sleep(config.broker_retry_delay).await {
                    break;
                }
                continue;
            }
        };

        match polled {
            DelayedPoll::Empty => {
                if !stop.sleep(config.poll_interval).await {
                    break;
                }
            }
            DelayedPoll::Pending(due_at) => {
                // Capped so an earlier entry parked meanwhile is not missed for long.
                let wait = until(due_at).min(config.poll_interval);
                if !stop.sleep(wait).await {
                    break;
                }
            }
            DelayedPoll::Due(execution) => {
                let queued = with_retry(&mut stop, config.broker_retry_delay, "enqueue_ready", || {
                    broker.enqueue_ready(&execution)
                })
                .await;
                match queued {
                    Some(()) => {
                        debug!(task_id = execution.task_id(), execution_id = execution.execution_id(), "Delayed execution promoted");
                    }
                    None => {
                        // Stopped mid-retry: park it again rather than lose it.
                        if let Err(e) = broker.enqueue_delayed(Utc::now(), &execution).await {
                            error!(execution_id = execution.execution_id(), error = %e, "Dropped a due execution");
                        }
                    }
                }
            }
        }
    }

    info!("Delay loop exited");
}

/// Drains the ready queues of every bound task into its handler.
pub(crate) async fn dispatch_loop(ctx: LoopContext) {
    let LoopContext {
        broker,
        config,
        registry,
        mut stop,
    } = ctx;

    let task_ids = registry.bound_task_ids();
    if task_ids.is_empty() {
        info!("No handlers bound, dispatch loop idle until stop");
        stop.stopped().await;
        return;
    }
    info!(tasks = ?task_ids, "Dispatch loop started");

    while !stop.is_stopped() {
        let execution = match broker.dequeue_ready(&task_ids, config.dequeue_timeout).await {
            Ok(Some(execution)) => execution,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Popping the ready queues failed");
                if !stop.sleep(config.broker_retry_delay).await {
                    break;
                }
                continue;
            }
        };

        if stop.is_stopped() {
            // Popped after stop: hand it back without running it.
            if let Err(e) = broker.enqueue_ready(&execution).await {
                warn!(execution_id = execution.execution_id(), error = %e, "Could not return execution to its queue");
            }
            break;
        }

        dispatch(&broker, &registry, &config, &mut stop, execution).await;
    }

    info!("Dispatch loop exited");
}

async fn dispatch(
    broker: &Arc<dyn Broker>,
    registry: &Registry,
    config: &SchedulerConfig,
    stop: &mut StopSignal,
    execution: Execution,
) {
    let Some(handler) = registry.handler(execution.task_id()) else {
        warn!(task_id = execution.task_id(), "No handler bound");
        return;
    };

    // Every retrying delivery is backed by a delayed entry until acknowledged.
    // Without one, an earlier delivery of this execution already succeeded.
    if execution.retry() {
        match broker.is_pending(execution.execution_id()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id = execution.task_id(), execution_id = execution.execution_id(), "Skipping acknowledged execution");
                return;
            }
            Err(e) => {
                warn!(execution_id = execution.execution_id(), error = %e, "Could not check pending entry, dispatching");
            }
        }
    }

    let data = execution.data().map(str::to_owned);
    let outcome = AssertUnwindSafe(handler.handle(data)).catch_unwind().await;

    match outcome {
        Ok(Ok(true)) => {
            debug!(task_id = execution.task_id(), execution_id = execution.execution_id(), "Handler succeeded");
            if execution.retry() {
                let id = execution.execution_id();
                with_retry(stop, config.broker_retry_delay, "clear_pending", || broker.clear_pending(id)).await;
            }
        }
        Ok(Ok(false)) => {
            warn!(task_id = execution.task_id(), execution_id = execution.execution_id(), "Handler reported failure");
        }
        Ok(Err(e)) => {
            warn!(task_id = execution.task_id(), execution_id = execution.execution_id(), error = %e, "Handler failed");
        }
        Err(panic) => {
            error!(
                task_id = execution.task_id(),
                execution_id = execution.execution_id(),
                panic = panic_message(panic.as_ref()),
                "Handler panicked"
            );
        }
    }
}

/// Retry a broker call while it fails transiently. `None` when stop was
/// requested first or the failure is permanent.
async fn with_retry<T, F, Fut>(stop: &mut StopSignal, delay: Duration, operation: &str, mut call: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
{
    loop {
        match call().await {
            Ok(value) => return Some(value),
            Err(e) if e.is_transient() => {
                warn!(operation, error = %e, "Broker call failed, retrying");
                if !stop.sleep(delay).await {
                    return None;
                }
            }
            Err(e) => {
                error!(operation, error = %e, "Broker call failed");
                return None;
            }
        }
    }
}

fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

fn instant_at(at: DateTime<Utc>) -> Instant {
    Instant::now() + until(at)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
