//! Row retrieval strategies
//!
//! A `/generate` request is validated into a [`GenerateRequest`] and then
//! served by one of two strategies:
//! - **direct range** (`truth_table`): stateless, asks the producer for
//!   exactly `[start, end)` and returns its lines
//! - **cached enumeration** (`true_rows`): the first request of a session
//!   writes every true row to the session's cache artifact; this and every
//!   later request are answered with a fixed-size window of that file

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::window::{read_window, DEFAULT_WINDOW_SIZE};
use crate::cache::{CacheError, CacheStore, SessionId};
use crate::producer::{ProducerError, RowProducer};

/// Default `start` when the parameter is absent
pub const DEFAULT_START: u64 = 0;

/// Default `end` when the parameter is absent
pub const DEFAULT_END: u64 = 100;

/// Errors surfaced by row retrieval
#[derive(Error, Debug)]
pub enum RowsError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}

impl From<std::io::Error> for RowsError {
    fn from(err: std::io::Error) -> Self {
        RowsError::Cache(CacheError::Io(err))
    }
}

/// Retrieval strategy selected by the `mode` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowMode {
    /// `truth_table`: recompute the requested range on every call
    #[default]
    DirectRange,
    /// `true_rows`: serve windows of the session's cached enumeration
    CachedEnumeration,
}

impl RowMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "truth_table" => Some(Self::DirectRange),
            "true_rows" => Some(Self::CachedEnumeration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectRange => "truth_table",
            Self::CachedEnumeration => "true_rows",
        }
    }
}

/// Raw `/generate` query parameters, exactly as sent by the page script
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateParams {
    pub expression: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub mode: Option<String>,
    pub session_id: Option<String>,
}

/// Validated `/generate` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub expression: String,
    pub start: u64,
    pub end: u64,
    pub mode: RowMode,
    /// Required for [`RowMode::CachedEnumeration`], optional otherwise
    pub session: Option<SessionId>,
}

impl GenerateRequest {
    pub fn from_params(params: &GenerateParams) -> Result<Self, RowsError> {
        let expression = params
            .expression
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| RowsError::InvalidRequest("No expression provided".to_string()))?
            .to_string();

        let mode = match non_blank(params.mode.as_deref()) {
            None => RowMode::default(),
            Some(raw) => RowMode::parse(raw).ok_or_else(|| {
                RowsError::InvalidRequest(format!(
                    "Unknown mode '{}'; expected truth_table or true_rows",
                    raw
                ))
            })?,
        };

        let start = parse_index("start", params.start.as_deref(), DEFAULT_START)?;
        let end = parse_index("end", params.end.as_deref(), DEFAULT_END)?;
        // `end` only bounds direct ranges; windows are sized by the service
        if mode == RowMode::DirectRange && end < start {
            return Err(RowsError::InvalidRequest(format!(
                "end ({}) must not be less than start ({})",
                end, start
            )));
        }

        let session = match mode {
            RowMode::CachedEnumeration => Some(SessionId::parse(params.session_id.as_deref())?),
            RowMode::DirectRange => SessionId::parse(params.session_id.as_deref()).ok(),
        };

        Ok(Self {
            expression,
            start,
            end,
            mode,
            session,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_index(name: &str, raw: Option<&str>, default: u64) -> Result<u64, RowsError> {
    match non_blank(raw) {
        None => Ok(default),
        Some(value) => value.parse::<u64>().map_err(|_| {
            RowsError::InvalidRequest(format!(
                "{} must be a non-negative integer, got '{}'",
                name, value
            ))
        }),
    }
}

/// Dispatches validated requests to the retrieval strategies.
pub struct RowService {
    store: CacheStore,
    producer: Arc<dyn RowProducer>,
    window_size: usize,
}

impl RowService {
    pub fn new(store: CacheStore, producer: Arc<dyn RowProducer>) -> Self {
        Self {
            store,
            producer,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>, RowsError> {
        match request.mode {
            RowMode::DirectRange => {
                self.direct_range(&request.expression, request.start, request.end)
                    .await
            }
            RowMode::CachedEnumeration => {
                let session = request.session.as_ref().ok_or(CacheError::InvalidSession)?;
                self.cached_enumeration(&request.expression, request.start, session)
                    .await
            }
        }
    }

    /// Rows `[start, end)` straight from the producer; nothing is stored.
    pub async fn direct_range(
        &self,
        expression: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<String>, RowsError> {
        Ok(self.producer.produce_range(expression, start, end).await?)
    }

    /// A window of the session's true-row enumeration.
    ///
    /// An existing artifact is read at `start`. Otherwise the producer writes
    /// the artifact and the first window (offset 0, whatever `start` was) is
    /// returned. Requests for one session are serialised on its population
    /// guard, so nobody reads an artifact that is still being written and
    /// concurrent first requests run the producer once.
    pub async fn cached_enumeration(
        &self,
        expression: &str,
        start: u64,
        session: &SessionId,
    ) -> Result<Vec<String>, RowsError> {
        let guard = self.store.population_guard(session);
        let result = {
            let _populating = guard.lock().await;
            self.window_or_populate(expression, start, session).await
        };
        self.store.release_guard(session, guard);
        result
    }

    async fn window_or_populate(
        &self,
        expression: &str,
        start: u64,
        session: &SessionId,
    ) -> Result<Vec<String>, RowsError> {
        let path = self.store.path_for(session);
        if self.store.exists(session).await {
            debug!(target: "cache", session = %session, start, "Serving cached window");
            return Ok(read_window(&path, start, self.window_size).await?);
        }

        // The root may have been purged or never created
        self.store.ensure_root().await?;
        if let Err(e) = self.producer.produce_all_to_file(expression, &path).await {
            // A partial artifact would be served as if it were complete
            if fs::remove_file(&path).await.is_ok() {
                warn!(target: "cache", session = %session, "Discarded partial session cache");
            }
            return Err(e.into());
        }
        info!(target: "cache", session = %session, path = %path.display(), "Populated session cache");

        Ok(read_window(&path, 0, self.window_size).await?)
    }
}
