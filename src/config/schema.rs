//! Config schema validation with typed checks and range enforcement.

use serde_json::{Map, Value};

/// Severity of a schema validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Hard error; startup must abort.
    Error,
    /// Advisory; logged but does not prevent startup.
    Warning,
}

/// A single schema validation finding.
#[derive(Debug, Clone)]
pub struct SchemaIssue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

/// Known top-level configuration keys.
const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["server", "cache", "producer", "web", "logging"];

/// Validate a raw config value.
///
/// Returns a (possibly empty) list of issues. Callers should inspect each
/// issue's `severity` to decide whether to abort or merely warn.
pub fn validate_schema(config: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    let obj = match config.as_object() {
        Some(o) => o,
        None => {
            issues.push(error(".", "Config root must be an object"));
            return issues;
        }
    };

    for key in obj.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            issues.push(SchemaIssue {
                severity: Severity::Warning,
                path: format!(".{}", key),
                message: format!("Unknown configuration key: {}", key),
            });
        }
    }

    if let Some(server) = section(obj, "server", &mut issues) {
        if let Some(port) = server.get("port") {
            match port.as_u64() {
                Some(p) if p <= u64::from(u16::MAX) => {}
                _ => issues.push(error(".server.port", "port must be an integer in 0..=65535")),
            }
        }
        expect_string(server, ".server.host", "host", &mut issues);
    }

    if let Some(cache) = section(obj, "cache", &mut issues) {
        expect_string(cache, ".cache.dir", "dir", &mut issues);
        if let Some(size) = cache.get("windowSize") {
            match size.as_u64() {
                Some(0) => issues.push(SchemaIssue {
                    severity: Severity::Warning,
                    path: ".cache.windowSize".to_string(),
                    message: "windowSize 0 makes every true_rows response empty".to_string(),
                }),
                Some(_) => {}
                None => issues.push(error(
                    ".cache.windowSize",
                    "windowSize must be a non-negative integer",
                )),
            }
        }
    }

    if let Some(producer) = section(obj, "producer", &mut issues) {
        expect_string(producer, ".producer.binary", "binary", &mut issues);
        if let Some(args) = producer.get("args") {
            let all_strings = args
                .as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false);
            if !all_strings {
                issues.push(error(".producer.args", "args must be an array of strings"));
            }
        }
        if let Some(timeout) = producer.get("timeoutSecs") {
            match timeout.as_u64() {
                Some(0) => issues.push(error(".producer.timeoutSecs", "timeoutSecs must be > 0")),
                Some(_) => {}
                None if timeout.is_null() => {}
                None => issues.push(error(
                    ".producer.timeoutSecs",
                    "timeoutSecs must be a positive integer or null",
                )),
            }
        }
    }

    if let Some(web) = section(obj, "web", &mut issues) {
        expect_string(web, ".web.root", "root", &mut issues);
    }

    if let Some(logging) = section(obj, "logging", &mut issues) {
        if let Some(format) = logging.get("format") {
            if !matches!(format.as_str(), Some("plaintext") | Some("json")) {
                issues.push(error(
                    ".logging.format",
                    "format must be \"plaintext\" or \"json\"",
                ));
            }
        }
        expect_string(logging, ".logging.level", "level", &mut issues);
    }

    issues
}

fn error(path: &str, message: &str) -> SchemaIssue {
    SchemaIssue {
        severity: Severity::Error,
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn section<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    issues: &mut Vec<SchemaIssue>,
) -> Option<&'a Map<String, Value>> {
    let value = obj.get(key)?;
    match value.as_object() {
        Some(section) => Some(section),
        None => {
            issues.push(error(
                &format!(".{}", key),
                &format!("{} must be an object", key),
            ));
            None
        }
    }
}

fn expect_string(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    issues: &mut Vec<SchemaIssue>,
) {
    if let Some(value) = section.get(key) {
        if !value.is_string() {
            issues.push(error(path, &format!("{} must be a string", key)));
        }
    }
}
