use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::handle::RunHandle;
use super::loops::{cron_loop, delay_loop, dispatch_loop, LoopContext};
use crate::broker::Broker;
use crate::config::SchedulerConfig;
use crate::cron::CronSchedule;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::{check_retry_timeout, Delivery, Execution, PushOptions};
use crate::handler::Handler;
use crate::lifecycle::{State, StopTrigger};
use crate::registry::{Registry, ScheduleEntry};
use crate::task::ScheduleOptions;

/// One scheduler process.
///
/// Register recurring tasks and bind handlers while stopped, then `start()`.
/// Several schedulers sharing a broker fire each cron tick once between them.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) registry: Registry,
    pub(crate) state: State,
    pub(crate) run: Option<RunHandle>,
}

impl Scheduler {
    pub fn new(broker: Arc<dyn Broker>, config: SchedulerConfig) -> Self {
        Self {
            config,
            broker,
            registry: Registry::default(),
            state: State::Stopped,
            run: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Add or replace the recurring schedule of `task_id`.
    pub fn register(&mut self, task_id: impl Into<String>, options: ScheduleOptions) -> SchedulerResult<()> {
        self.ensure_stopped("register")?;
        let task_id = task_id.into();
        let cron = CronSchedule::parse(&options.cron_expr)?;
        if let Some(timeout) = options.retry_timeout {
            check_retry_timeout(timeout)?;
        }
        info!(task_id = %task_id, cron = %options.cron_expr, retry = options.retry, "Registering schedule");
        self.registry.register(task_id, ScheduleEntry { options, cron });
        Ok(())
    }

    /// Associate `handler` with `task_id`, replacing any previous one.
    pub fn bind<H>(&mut self, task_id: impl Into<String>, handler: H) -> SchedulerResult<()>
    where
        H: Handler + 'static,
    {
        self.ensure_stopped("bind")?;
        let task_id = task_id.into();
        if self.registry.bind(task_id.clone(), Arc::new(handler)) {
            debug!(task_id = %task_id, "Replaced bound handler");
        } else {
            debug!(task_id = %task_id, "Bound handler");
        }
        Ok(())
    }

    /// Enqueue one ad hoc execution and return its id.
    ///
    /// Works in any state: the execution lands in the broker and is picked up
    /// by whichever process has `task_id` bound.
    pub async fn push(&self, task_id: impl Into<String>, options: PushOptions) -> SchedulerResult<String> {
        let now = Utc::now();
        let delivery = Execution::builder(task_id).options(options).build(now)?;
        let execution_id = delivery.execution().execution_id().to_string();

        match delivery {
            Delivery::Immediate(execution) => {
                // Armed before queueing, so a fast success always finds it to clear.
                if let Some(deadline) = execution.retry_deadline(now, self.config.default_retry_timeout)? {
                    self.broker.enqueue_delayed(deadline, &execution).await?;
                }
                self.broker.enqueue_ready(&execution).await?;
                debug!(task_id = execution.task_id(), execution_id = %execution_id, "Pushed execution");
            }
            Delivery::Delayed { due_at, execution } => {
                // Its retry entry is armed on promotion; reject windows that cannot be.
                execution.retry_deadline(due_at, self.config.default_retry_timeout)?;
                self.broker.enqueue_delayed(due_at, &execution).await?;
                debug!(task_id = execution.task_id(), execution_id = %execution_id, %due_at, "Pushed delayed execution");
            }
        }

        Ok(execution_id)
    }

    /// Spawn one cron loop per registered schedule, the delay loop and the
    /// dispatch loop. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> SchedulerResult<()> {
        self.ensure_stopped("start")?;
        check_retry_timeout(self.config.default_retry_timeout)?;

        let (trigger, stop) = StopTrigger::new();
        let registry = Arc::new(self.registry.clone());
        let ctx = LoopContext {
            broker: self.broker.clone(),
            config: Arc::new(self.config.clone()),
            registry: registry.clone(),
            stop,
        };

        let mut loops = Vec::with_capacity(registry.schedule_count() + 2);
        for (task_id, entry) in registry.schedules() {
            loops.push(tokio::spawn(cron_loop(task_id.clone(), entry.clone(), ctx.clone())));
        }
        loops.push(tokio::spawn(delay_loop(ctx.clone())));
        loops.push(tokio::spawn(dispatch_loop(ctx)));

        info!(
            schedules = registry.schedule_count(),
            handlers = registry.handler_count(),
            "Scheduler started"
        );

        // Loops of an earlier run still winding down keep their own raised flag.
        self.run = Some(RunHandle { trigger, loops });
        self.state = State::Running;
        Ok(())
    }

    /// Ask every loop to exit at its next wake point. Returns whether the
    /// scheduler was running.
    pub fn stop(&mut self) -> bool {
        if self.state == State::Stopped {
            return false;
        }
        if let Some(run) = &self.run {
            run.stop();
        }
        self.state = State::Stopped;
        info!("Scheduler stopping");
        true
    }

    /// Stop and wait until every loop has exited.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(run) = self.run.take() {
            run.join().await;
            info!("Scheduler shut down");
        }
    }

    /// Forget every schedule and handler. Only allowed while stopped.
    pub fn clear(&mut self) -> SchedulerResult<()> {
        self.ensure_stopped("clear")?;
        self.registry.clear();
        Ok(())
    }

    fn ensure_stopped(&self, operation: &'static str) -> SchedulerResult<()> {
        match self.state {
            State::Stopped => Ok(()),
            State::Running => Err(SchedulerError::running(operation)),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.stop();
        }
    }
}
