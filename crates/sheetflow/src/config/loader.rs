use std::path::Path;
use std::str::FromStr;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "SHEETFLOW_CONFIG";

const QUEUE_URL_ENV: &str = "SHEETFLOW_QUEUE_URL";
const HOST_ENV: &str = "SHEETFLOW_HOST";
const PORT_ENV: &str = "SHEETFLOW_PORT";
const UPLOAD_DIR_ENV: &str = "SHEETFLOW_UPLOAD_DIR";
const MAX_UPLOAD_BYTES_ENV: &str = "SHEETFLOW_MAX_UPLOAD_BYTES";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the file named by `SHEETFLOW_CONFIG` (or defaults), then applies
/// environment overrides and validates the result.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_config(path.trim())?,
        _ => Config::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies `SHEETFLOW_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(QUEUE_URL_ENV) {
        config.queue_url = url;
    }
    if let Some(host) = lookup(HOST_ENV) {
        config.api.host = host;
    }
    if let Some(port) = parse_env(&lookup, PORT_ENV)? {
        config.api.port = port;
    }
    if let Some(dir) = lookup(UPLOAD_DIR_ENV) {
        config.uploads.directory = dir;
    }
    if let Some(max) = parse_env(&lookup, MAX_UPLOAD_BYTES_ENV)? {
        config.uploads.max_bytes = max;
    }
    Ok(())
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            }),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.queue_url.trim().is_empty() {
        return Err(validation("queue_url must not be empty"));
    }
    if config.uploads.directory.trim().is_empty() {
        return Err(validation("uploads.directory must not be empty"));
    }
    if config.uploads.max_bytes == 0 {
        return Err(validation("uploads.max_bytes must be greater than 0"));
    }
    if config.numeric_fields.iter().any(|f| f.trim().is_empty()) {
        return Err(validation("numeric_fields must not contain empty names"));
    }

    for (name, worker) in [("csv", &config.workers.csv), ("excel", &config.workers.excel)] {
        if worker.concurrency == 0 {
            return Err(validation(format!(
                "workers.{name}.concurrency must be at least 1"
            )));
        }
        if worker.poll_interval_ms == 0 {
            return Err(validation(format!(
                "workers.{name}.poll_interval_ms must be greater than 0"
            )));
        }
        if worker.stall_timeout_secs == 0 {
            return Err(validation(format!(
                "workers.{name}.stall_timeout_secs must be greater than 0"
            )));
        }
        let field_lists = [&worker.multi_value_fields, &worker.required_columns];
        if field_lists
            .into_iter()
            .flatten()
            .flatten()
            .any(|f| f.trim().is_empty())
        {
            return Err(validation(format!(
                "workers.{name} field lists must not contain empty names"
            )));
        }
    }

    Ok(())
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
