use config::{Config, File, FileFormat};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::time_unit::parse_duration_str;

/// Runtime settings shared by the control loops and the broker implementations.
///
/// Read from the `[scheduler]` table of the application config. Durations accept
/// the shorthand understood by [`crate::TimeUnit::parse_duration`] (`"500ms"`, `"1s"`)
/// or a bare number of milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Namespace for every broker key.
    pub key_prefix: String,
    /// Guard window of the per-tick dedup lock.
    #[serde(deserialize_with = "deserialize_duration")]
    pub lock_guard: Duration,
    /// Idle poll of the delay loop, and the longest single sleep towards a future entry.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Upper bound for one blocking pop of the ready queues.
    #[serde(deserialize_with = "deserialize_duration")]
    pub dequeue_timeout: Duration,
    /// Back-off between retries of a failed broker call inside a loop.
    #[serde(deserialize_with = "deserialize_duration")]
    pub broker_retry_delay: Duration,
    /// Retry window for executions that enable retry without setting one.
    #[serde(deserialize_with = "deserialize_duration")]
    pub default_retry_timeout: Duration,
    pub redis_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "baton".to_string(),
            lock_guard: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            dequeue_timeout: Duration::from_secs(1),
            broker_retry_delay: Duration::from_millis(500),
            default_retry_timeout: Duration::from_secs(60),
            redis_url: None,
        }
    }
}

impl SchedulerConfig {
    /// Extract the `[scheduler]` table, falling back to defaults when it is absent.
    pub fn from_config(config: &Config) -> SchedulerResult<Self> {
        match config.get::<SchedulerConfig>("scheduler") {
            Ok(parsed) => Ok(parsed),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => parse_duration_str(&text).map_err(serde::de::Error::custom),
    }
}

/// Load config from a specific TOML file
pub fn load_toml_config<P: AsRef<Path>>(path: P) -> SchedulerResult<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
        .add_source(config::Environment::with_prefix("APP").separator("_"))
        .build()?;
    Ok(config)
}

/// Load config from a specific YAML file
pub fn load_yaml_config<P: AsRef<Path>>(path: P) -> SchedulerResult<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Yaml))
        .add_source(config::Environment::with_prefix("APP").separator("_"))
        .build()?;
    Ok(config)
}

/// Resolve config placeholder like ${app.cron} or ${app.cron:default}
pub fn resolve_config_value(value: &str, config: &Config) -> SchedulerResult<String> {
    let Some(inner) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(value.to_string());
    };

    match inner.split_once(':') {
        Some((key, default_value)) => match config.get_string(key) {
            Ok(resolved) => Ok(resolved),
            Err(_) => Ok(default_value.to_string()),
        },
        None => config.get_string(inner).map_err(SchedulerError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::builder()
            .add_source(File::from_str(
                r#"
                [app]
                cron = "0 */5 * * * *"

                [scheduler]
                key_prefix = "jobs"
                lock_guard = "2s"
                dequeue_timeout = 250
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_scheduler_section() {
        let parsed = SchedulerConfig::from_config(&sample()).unwrap();
        assert_eq!(parsed.key_prefix, "jobs");
        assert_eq!(parsed.lock_guard, Duration::from_secs(2));
        assert_eq!(parsed.dequeue_timeout, Duration::from_millis(250));
        assert_eq!(parsed.poll_interval, Duration::from_secs(1));
        assert!(parsed.redis_url.is_none());
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let parsed = SchedulerConfig::from_config(&Config::default()).unwrap();
        assert_eq!(parsed.key_prefix, "baton");
        assert_eq!(parsed.default_retry_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_placeholders() {
        let config = sample();
        assert_eq!(resolve_config_value("${app.cron}", &config).unwrap(), "0 */5 * * * *");
        assert_eq!(resolve_config_value("${app.missing:true}", &config).unwrap(), "true");
        assert_eq!(resolve_config_value("literal", &config).unwrap(), "literal");
        assert!(resolve_config_value("${app.missing}", &config).is_err());
    }
}
