//! Configuration loading
//!
//! Reads a JSON5 file, substitutes `${VAR}` environment references in string
//! values, validates the result and deserializes it into [`Settings`] with
//! defaults for every missing field. A missing file is not an error.
//!
//! Path priority: `--config` flag > `TTABLE_CONFIG_PATH` > `./ttable.json5`.

pub mod defaults;
pub mod schema;

use regex::Regex;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

pub use defaults::{
    CacheSettings, LogFormatSetting, LoggingSettings, ProducerSettings, ServerSettings, Settings,
    WebSettings,
};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "ttable.json5";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration contains {count} error(s)")]
    Invalid { count: usize },
}

/// Resolve the config file path.
pub fn get_config_path(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var("TTABLE_CONFIG_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load the raw config value. Returns `{}` if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut value = parse_json5(&content, path)?;
    substitute_env_vars(&mut value)?;
    Ok(value)
}

/// Load, validate and resolve settings, applying environment overrides.
///
/// Schema warnings are logged; any schema error aborts with
/// [`ConfigError::Invalid`].
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = load_config(path)?;

    let issues = schema::validate_schema(&raw);
    let mut errors = 0;
    for issue in &issues {
        match issue.severity {
            schema::Severity::Error => {
                tracing::error!(target: "config", path = %issue.path, "{}", issue.message);
                errors += 1;
            }
            schema::Severity::Warning => {
                tracing::warn!(target: "config", path = %issue.path, "{}", issue.message);
            }
        }
    }
    if errors > 0 {
        return Err(ConfigError::Invalid { count: errors });
    }

    let mut settings = Settings::from_value(&raw)?;
    settings.apply_env_overrides()?;
    Ok(settings)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Substitute environment variables in string values.
/// Pattern: ${VAR} where VAR matches [A-Z_][A-Z0-9_]*
/// Escape with $${VAR} to get literal ${VAR}
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid")
    });

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}
