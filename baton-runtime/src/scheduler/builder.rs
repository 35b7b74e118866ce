use super::scheduler::Scheduler;
use crate::broker::{Broker, MemoryBroker, RedisBroker};
use crate::config::{load_toml_config, load_yaml_config, resolve_config_value, SchedulerConfig};
use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::TASKS;
use crate::task::{ScheduleOptions, TaskDefinition};
use crate::time_unit::parse_duration_str;
use config::Config;
use std::sync::Arc;
use tracing::info;

/// Builder for the scheduler
pub struct SchedulerBuilder {
    pub(crate) config: Arc<Config>,
    pub(crate) scheduler_config: Option<SchedulerConfig>,
    pub(crate) broker: Option<Arc<dyn Broker>>,
    pub(crate) should_register_all: bool,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Create a new scheduler builder with default config (empty)
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create with TOML config file
    pub fn with_toml(path: &str) -> SchedulerResult<Self> {
        Ok(Self::with_config(load_toml_config(path)?))
    }

    /// Create with YAML config file
    pub fn with_yaml(path: &str) -> SchedulerResult<Self> {
        Ok(Self::with_config(load_yaml_config(path)?))
    }

    /// Create with custom config
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            scheduler_config: None,
            broker: None,
            should_register_all: false,
        }
    }

    /// Override the `[scheduler]` section of the config.
    pub fn scheduler_config(mut self, scheduler_config: SchedulerConfig) -> Self {
        self.scheduler_config = Some(scheduler_config);
        self
    }

    /// Use `broker` instead of a private in-memory one.
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Connect to the Redis server named by `scheduler.redis_url`.
    pub async fn connect_redis(self) -> SchedulerResult<Self> {
        let scheduler_config = self.resolved_scheduler_config()?;
        let url = scheduler_config
            .redis_url
            .clone()
            .ok_or_else(|| SchedulerError::broker("scheduler.redis_url is not set"))?;
        let broker = RedisBroker::connect(&url, scheduler_config.key_prefix.clone()).await?;
        Ok(self.broker(Arc::new(broker)))
    }

    /// Register and bind every task declared with `#[task]` when building.
    pub fn register_all(mut self) -> Self {
        self.should_register_all = true;
        self
    }

    /// Build the scheduler (does not start it yet)
    ///
    /// Placeholders of declared tasks are resolved here, so configuration
    /// mistakes surface before anything runs.
    pub fn build(self) -> SchedulerResult<Scheduler> {
        let scheduler_config = self.resolved_scheduler_config()?;
        let broker = self
            .broker
            .unwrap_or_else(|| Arc::new(MemoryBroker::new()) as Arc<dyn Broker>);
        let mut scheduler = Scheduler::new(broker, scheduler_config);

        if self.should_register_all {
            let definitions: Vec<TaskDefinition> = TASKS.iter().map(|f| f()).collect();
            let mut applied = 0;
            for definition in definitions {
                if apply_definition(&mut scheduler, &definition, &self.config)? {
                    applied += 1;
                }
            }
            info!(declared = TASKS.len(), applied, "Registered declared tasks");
        }

        Ok(scheduler)
    }

    fn resolved_scheduler_config(&self) -> SchedulerResult<SchedulerConfig> {
        match &self.scheduler_config {
            Some(explicit) => Ok(explicit.clone()),
            None => SchedulerConfig::from_config(&self.config),
        }
    }
}

/// Bind a declared task and register its schedule. Returns `false` when the
/// task is disabled.
pub(crate) fn apply_definition(
    scheduler: &mut Scheduler,
    definition: &TaskDefinition,
    config: &Config,
) -> SchedulerResult<bool> {
    let enabled = resolve_config_value(definition.enabled, config)?;
    if enabled.eq_ignore_ascii_case("false") {
        info!(task_id = definition.id, "Declared task disabled");
        return Ok(false);
    }

    scheduler.bind(definition.id, definition.handler)?;

    let cron = resolve_config_value(definition.cron, config)?;
    if cron.is_empty() {
        return Ok(true);
    }

    let retry = resolve_config_value(definition.retry, config)?;
    let mut options = ScheduleOptions::new(cron).retry(retry.eq_ignore_ascii_case("true"));
    let retry_timeout = resolve_config_value(definition.retry_timeout, config)?;
    if !retry_timeout.is_empty() {
        options = options.retry_timeout(parse_duration_str(&retry_timeout)?);
    }

    scheduler.register(definition.id, options)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFuture;
    use config::{File, FileFormat};
    use std::time::Duration;

    fn noop(_: Option<String>) -> HandlerFuture<'static> {
        Box::pin(async { Ok::<_, crate::error::BoxError>(true) })
    }

    fn app_config() -> Config {
        Config::builder()
            .add_source(File::from_str(
                r#"
                [app]
                nightly = "0 0 2 * * *"
                nightly_enabled = "true"
                backup_enabled = "false"

                [scheduler]
                key_prefix = "test"
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_reads_scheduler_section() {
        let scheduler = SchedulerBuilder::with_config(app_config()).build().unwrap();
        assert_eq!(scheduler.config().key_prefix, "test");
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_apply_definition_with_placeholders() {
        let config = app_config();
        let mut scheduler = SchedulerBuilder::new().build().unwrap();
        let definition = TaskDefinition::builder("nightly", noop)
            .cron("${app.nightly}")
            .retry_timeout("45s")
            .enabled("${app.nightly_enabled:true}")
            .build();

        assert!(apply_definition(&mut scheduler, &definition, &config).unwrap());
        let (_, entry) = scheduler.registry.schedules().next().unwrap();
        assert_eq!(entry.options.cron_expr, "0 0 2 * * *");
        assert!(entry.options.retry);
        assert_eq!(entry.options.retry_timeout, Some(Duration::from_secs(45)));
        assert!(scheduler.registry.handler("nightly").is_some());
    }

    #[test]
    fn test_disabled_definition_is_skipped() {
        let mut scheduler = SchedulerBuilder::new().build().unwrap();
        let definition = TaskDefinition::builder("backup", noop)
            .cron("0 0 * * * *")
            .enabled("${app.backup_enabled}")
            .build();
        assert!(!apply_definition(&mut scheduler, &definition, &app_config()).unwrap());
        assert!(scheduler.registry.is_empty());
    }

    #[test]
    fn test_definition_without_cron_is_only_bound() {
        let mut scheduler = SchedulerBuilder::new().build().unwrap();
        let definition = TaskDefinition::builder("adhoc", noop).build();
        assert!(apply_definition(&mut scheduler, &definition, &Config::default()).unwrap());
        assert_eq!(scheduler.registry.schedule_count(), 0);
        assert_eq!(scheduler.registry.bound_task_ids(), vec!["adhoc".to_string()]);
    }

    #[test]
    fn test_bad_retry_timeout_fails_fast() {
        let mut scheduler = SchedulerBuilder::new().build().unwrap();
        let definition = TaskDefinition::builder("nightly", noop)
            .cron("0 0 2 * * *")
            .retry_timeout("soon")
            .build();
        let err = apply_definition(&mut scheduler, &definition, &Config::default()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDuration(_)));
    }
}
