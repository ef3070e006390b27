//! Typed settings with defaults
//!
//! Every section derives `#[serde(default)]`, so a partial (or empty) config
//! file resolves to a complete [`Settings`]. Environment overrides are applied
//! after deserialization:
//! - `TTABLE_PORT` → `server.port`
//! - `TTABLE_CACHE_DIR` → `cache.dir`
//! - `TTABLE_PRODUCER` → `producer.binary`

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigError;
use crate::cache::window::DEFAULT_WINDOW_SIZE;
use crate::cache::DEFAULT_CACHE_DIR;
use crate::producer::process::DEFAULT_PRODUCER_BINARY;

/// Default listen port (the page script talks to the same origin)
pub const DEFAULT_PORT: u16 = 5000;

/// Default listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default web root holding `templates/index.html` and `static/`
pub const DEFAULT_WEB_ROOT: &str = "truth_table_website";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub producer: ProducerSettings,
    pub web: WebSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    /// Storage root for session artifacts; removed on shutdown
    pub dir: PathBuf,
    /// Lines returned per cached-enumeration request
    pub window_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProducerSettings {
    /// Evaluator executable
    pub binary: PathBuf,
    /// Arguments placed before the expression
    pub args: Vec<String>,
    /// Kill the evaluator after this many seconds; unset waits forever
    pub timeout_secs: Option<u64>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_PRODUCER_BINARY),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl ProducerSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebSettings {
    pub root: PathBuf,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_WEB_ROOT),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Plaintext,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub format: LogFormatSetting,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormatSetting::Plaintext,
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Deserialize settings from a raw config value, filling in defaults.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
            key: ".".to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `TTABLE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = non_empty_var("TTABLE_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TTABLE_PORT".to_string(),
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(dir) = non_empty_var("TTABLE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(binary) = non_empty_var("TTABLE_PRODUCER") {
            self.producer.binary = PathBuf::from(binary);
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::ENV_LOCK;
    use serde_json::json;

    #[test]
    fn test_empty_config_gets_all_defaults() {
        let settings = Settings::from_value(&json!({})).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.cache.dir, PathBuf::from("cache_files"));
        assert_eq!(settings.cache.window_size, 100);
        assert_eq!(settings.producer.timeout(), None);
        assert_eq!(settings.web.root, PathBuf::from("truth_table_website"));
        assert_eq!(settings.logging.format, LogFormatSetting::Plaintext);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let settings = Settings::from_value(&json!({
            "server": { "host": "127.0.0.1" },
            "producer": { "args": ["--quiet"], "timeoutSecs": 5 },
            "logging": { "format": "json" },
        }))
        .unwrap();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.producer.args, vec!["--quiet"]);
        assert_eq!(settings.producer.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(settings.logging.format, LogFormatSetting::Json);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_wrong_type_is_invalid_value() {
        let err = Settings::from_value(&json!({ "cache": { "windowSize": "many" } })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("TTABLE_PORT", "9001");
        env::set_var("TTABLE_CACHE_DIR", "/var/cache/ttable");
        env::set_var("TTABLE_PRODUCER", "/usr/local/bin/ttable-eval");

        let mut settings = Settings::default();
        settings.apply_env_overrides().unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.cache.dir, PathBuf::from("/var/cache/ttable"));
        assert_eq!(
            settings.producer.binary,
            PathBuf::from("/usr/local/bin/ttable-eval")
        );

        env::set_var("TTABLE_PORT", "not-a-port");
        assert!(settings.apply_env_overrides().is_err());

        env::remove_var("TTABLE_PORT");
        env::remove_var("TTABLE_CACHE_DIR");
        env::remove_var("TTABLE_PRODUCER");
    }
}
