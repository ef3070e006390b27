//! Row producer backed by the external evaluator binary.
//!
//! Invocation forms:
//! - `<program> [args..] <expression> <start> <end>` prints rows `[start, end)`
//!   on stdout
//! - `<program> [args..] <expression> <cache_path>` writes every true row to
//!   `cache_path`

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ProducerError, RowProducer};

/// Default evaluator binary, relative to the working directory
pub const DEFAULT_PRODUCER_BINARY: &str = "./website_binary_ttable";

/// Longest diagnostic carried into an error message
const MAX_DIAGNOSTIC_CHARS: usize = 512;

/// Spawns the evaluator once per request.
#[derive(Debug, Clone)]
pub struct ProcessRowProducer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRowProducer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments placed before the expression on every invocation
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Kill the evaluator if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, tail: &[&str]) -> Result<Output, ProducerError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(tail)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let pending = cmd.output();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target: "producer",
                        program = %self.program.display(),
                        timeout_secs = limit.as_secs(),
                        "Row producer timed out"
                    );
                    return Err(ProducerError::TimedOut(limit));
                }
            },
            None => pending.await,
        };

        let output = result.map_err(|source| ProducerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ProducerError::Failed {
                status: output.status.to_string(),
                diagnostic: diagnostic(&output),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl RowProducer for ProcessRowProducer {
    async fn produce_range(
        &self,
        expression: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<String>, ProducerError> {
        let start_arg = start.to_string();
        let end_arg = end.to_string();
        let output = self.run(&[expression, start_arg.as_str(), end_arg.as_str()]).await?;

        let stdout = String::from_utf8(output.stdout).map_err(|_| ProducerError::Output)?;
        let rows: Vec<String> = stdout.lines().map(str::to_string).collect();

        debug!(target: "producer", start, end, rows = rows.len(), "Produced row range");
        Ok(rows)
    }

    async fn produce_all_to_file(
        &self,
        expression: &str,
        target: &Path,
    ) -> Result<(), ProducerError> {
        let target_arg = target.to_string_lossy().into_owned();
        self.run(&[expression, target_arg.as_str()]).await?;

        debug!(target: "producer", path = %target.display(), "Wrote true rows");
        Ok(())
    }
}

/// Failure text for a finished process: stderr, else stdout, trimmed.
///
/// The evaluator reports bad expressions on stdout, so stdout is the fallback.
fn diagnostic(output: &Output) -> String {
    let text = [&output.stderr, &output.stdout]
        .into_iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| "no diagnostic output".to_string());

    if text.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let truncated: String = text.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake evaluator: ranges print `row N`, file mode writes two rows,
    /// expression `bad` fails like the real binary does.
    const FAKE_EVALUATOR: &str = r#"
if [ "$1" = "bad" ]; then
    echo "Variables must be a-z lowercase."
    exit 1
fi
if [ "$1" = "slow" ]; then
    sleep 5
fi
if [ "$#" -eq 3 ]; then
    i=$2
    while [ "$i" -lt "$3" ]; do
        echo "row $i"
        i=$((i + 1))
    done
    exit 0
fi
if [ "$#" -eq 2 ]; then
    printf 'a | b | out\n1 | 1 | 1\n' > "$2"
    exit 0
fi
echo "usage: evaluator <expression> <start> <end>" >&2
exit 2
"#;

    fn fake_producer() -> (ProcessRowProducer, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("evaluator.sh");
        std::fs::write(&script, FAKE_EVALUATOR).unwrap();
        let producer = ProcessRowProducer::new("/bin/sh")
            .with_args(vec![script.to_string_lossy().into_owned()]);
        (producer, dir)
    }

    #[tokio::test]
    async fn test_produce_range_returns_stdout_lines() {
        let (producer, _dir) = fake_producer();
        let rows = producer.produce_range("a&b", 0, 4).await.unwrap();
        assert_eq!(rows, vec!["row 0", "row 1", "row 2", "row 3"]);
    }

    #[tokio::test]
    async fn test_produce_range_empty_range() {
        let (producer, _dir) = fake_producer();
        let rows = producer.produce_range("a&b", 7, 7).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_produce_all_to_file_writes_target() {
        let (producer, dir) = fake_producer();
        let target = dir.path().join("s1.cache");
        producer.produce_all_to_file("a&b", &target).await.unwrap();

        let content = std::fs::read_to_string(&target).unwrap();
        assert_eq!(content, "a | b | out\n1 | 1 | 1\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stdout_diagnostic() {
        let (producer, _dir) = fake_producer();
        let err = producer.produce_range("bad", 0, 4).await.unwrap_err();
        match err {
            ProducerError::Failed { diagnostic, .. } => {
                assert_eq!(diagnostic, "Variables must be a-z lowercase.");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let producer = ProcessRowProducer::new("/nonexistent/evaluator");
        let err = producer.produce_range("a", 0, 1).await.unwrap_err();
        assert!(matches!(err, ProducerError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/evaluator"));
    }

    #[tokio::test]
    async fn test_timeout_kills_slow_producer() {
        let (producer, _dir) = fake_producer();
        let producer = producer.with_timeout(Some(Duration::from_millis(100)));
        let err = producer.produce_range("slow", 0, 1).await.unwrap_err();
        assert!(matches!(err, ProducerError::TimedOut(_)));
    }

    #[test]
    fn test_diagnostic_prefers_stderr_and_truncates() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: b"from stdout".to_vec(),
            stderr: b"  from stderr \n".to_vec(),
        };
        assert_eq!(diagnostic(&output), "from stderr");

        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: "x".repeat(2000).into_bytes(),
            stderr: Vec::new(),
        };
        let text = diagnostic(&output);
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), MAX_DIAGNOSTIC_CHARS + 3);
    }
}
