//! Loading: optional YAML file, then `FLIPPER_*` environment overrides, then validation.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CoreConfig, RecommendationMode, SourceMode};
use crate::validate::validate;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "FLIPPER_CONFIG";

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, an override is
/// malformed, or the result fails validation.
pub fn load() -> ConfigResult<CoreConfig> {
    let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    load_from(path.as_deref(), std::env::vars())
}

/// Load configuration from an explicit file and environment snapshot.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, an override is
/// malformed, or the result fails validation.
pub fn load_from(
    path: Option<&Path>,
    env: impl IntoIterator<Item = (String, String)>,
) -> ConfigResult<CoreConfig> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => CoreConfig::default(),
    };
    for (key, value) in env {
        apply_override(&mut config, &key, value)?;
    }
    validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> ConfigResult<CoreConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration file");
    if raw.trim().is_empty() {
        return Ok(CoreConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_override(config: &mut CoreConfig, key: &str, value: String) -> ConfigResult<()> {
    match key {
        "FLIPPER_WORKER_COUNT" => config.engine.worker_count = parse(key, &value)?,
        "FLIPPER_SUB_TASK_SIZE" => config.engine.sub_task_size = parse(key, &value)?,
        "FLIPPER_MAX_RETRIES" => config.engine.max_retries = parse(key, &value)?,
        "FLIPPER_RETRY_BACKOFF_MS" => config.engine.retry_backoff_ms = parse(key, &value)?,
        "FLIPPER_FETCH_TIMEOUT_SECS" => config.engine.fetch_timeout_secs = parse(key, &value)?,
        "FLIPPER_USER_AGENT" => config.engine.user_agent = value,
        "FLIPPER_EVENT_CAPACITY" => config.event_capacity = parse(key, &value)?,
        "FLIPPER_DATABASE_URL" => config.database_url = non_empty(value),
        "FLIPPER_SERVICE_BIND" => config.service_bind = non_empty(value),
        "FLIPPER_REMOTE_ENDPOINT" => {
            config.source = non_empty(value).map_or(SourceMode::Local, |endpoint| {
                SourceMode::Remote { endpoint }
            });
        }
        "FLIPPER_RECOMMENDATION_MODE" => {
            config.recommendations = match value.as_str() {
                "local" => RecommendationMode::Local,
                "server_fetch" => RecommendationMode::ServerFetch,
                _ => {
                    return Err(ConfigError::invalid(
                        "recommendations",
                        Some(value),
                        "unknown_recommendation_mode",
                    ));
                }
            };
        }
        "FLIPPER_LOG_LEVEL" => config.logging.level = value,
        "FLIPPER_LOG_FORMAT" => config.logging.format = non_empty(value),
        _ => {}
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field_name(key), Some(value.to_string()), "not_a_number"))
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn field_name(key: &str) -> &'static str {
    match key {
        "FLIPPER_WORKER_COUNT" => "engine.worker_count",
        "FLIPPER_SUB_TASK_SIZE" => "engine.sub_task_size",
        "FLIPPER_MAX_RETRIES" => "engine.max_retries",
        "FLIPPER_RETRY_BACKOFF_MS" => "engine.retry_backoff_ms",
        "FLIPPER_FETCH_TIMEOUT_SECS" => "engine.fetch_timeout_secs",
        "FLIPPER_EVENT_CAPACITY" => "event_capacity",
        _ => "environment",
    }
}
