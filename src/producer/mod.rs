//! Row producer abstraction.
//!
//! The truth table evaluator is an external collaborator. It is reached
//! through the [`RowProducer`] trait so the windowing logic can run against
//! the real evaluator binary ([`ProcessRowProducer`]) or an in-process double.

pub mod process;

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use process::ProcessRowProducer;

/// Errors raised while invoking the row producer
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("failed to launch row producer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("row producer failed ({status}): {diagnostic}")]
    Failed { status: String, diagnostic: String },

    #[error("row producer output is not valid UTF-8")]
    Output,

    #[error("row producer timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Source of truth table rows.
#[async_trait]
pub trait RowProducer: Send + Sync {
    /// Rows `[start, end)` of the table for `expression`, one string per line.
    async fn produce_range(
        &self,
        expression: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<String>, ProducerError>;

    /// Scan the entire table and write every true row to `target`.
    ///
    /// Returns once the file has been completely written.
    async fn produce_all_to_file(&self, expression: &str, target: &Path)
        -> Result<(), ProducerError>;
}
