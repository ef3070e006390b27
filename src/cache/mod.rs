//! Session-scoped cache storage
//!
//! Each browser session owns at most one cache artifact: the full enumeration
//! of true rows for the expression it last requested, stored as
//! `<root>/<session_id>.cache`. File contents are never held in memory; reads
//! go through [`window::read_window`].
//!
//! The store also hands out per-session population guards so that two
//! concurrent first requests for the same session run the producer once.

pub mod window;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// File extension of cache artifacts
pub const CACHE_EXTENSION: &str = "cache";

/// Default storage root, relative to the working directory
pub const DEFAULT_CACHE_DIR: &str = "cache_files";

/// Errors raised by cache storage operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No session ID provided")]
    InvalidSession,

    #[error("No cache files found for the provided session ID")]
    NotFound { session: String },

    #[error("Error deleting cache file: {source}")]
    Deletion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opaque client-supplied session identifier.
///
/// Only presence is validated: the raw value must contain something other
/// than whitespace. The value itself is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: Option<&str>) -> Result<Self, CacheError> {
        match raw {
            Some(value) if !value.trim().is_empty() => Ok(Self(value.to_string())),
            _ => Err(CacheError::InvalidSession),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Guard serialising cache population for one session
pub type PopulationGuard = Arc<tokio::sync::Mutex<()>>;

/// Owner of the session → artifact mapping.
///
/// Cloning is cheap and clones share the population guards.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    guards: Arc<Mutex<HashMap<SessionId, PopulationGuard>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Storage root holding every artifact
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root (and parents) if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Artifact path for a session.
    ///
    /// Pure and injective: the session id is escaped into a single path
    /// component, so distinct ids never share a file and no id can address a
    /// file outside the root.
    pub fn path_for(&self, session: &SessionId) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_stem(session), CACHE_EXTENSION))
    }

    /// Whether an artifact (complete or still being written) exists.
    pub async fn exists(&self, session: &SessionId) -> bool {
        fs::try_exists(self.path_for(session))
            .await
            .unwrap_or(false)
    }

    /// Population guard for a session, created on first use.
    pub fn population_guard(&self, session: &SessionId) -> PopulationGuard {
        self.guards
            .lock()
            .entry(session.clone())
            .or_default()
            .clone()
    }

    /// Drop the session's guard entry once no other request holds it.
    ///
    /// Callers pass back the guard they got from [`population_guard`] after
    /// unlocking it. Entries still shared with waiters are kept, so a session
    /// never has two live guards.
    ///
    /// [`population_guard`]: CacheStore::population_guard
    pub fn release_guard(&self, session: &SessionId, guard: PopulationGuard) {
        let mut guards = self.guards.lock();
        // The map and `guard` are the only holders
        let idle = guards.get(session).is_some_and(|current| {
            Arc::ptr_eq(current, &guard) && Arc::strong_count(&guard) == 2
        });
        // Released under the map lock so concurrent releases see each other
        drop(guard);
        if idle {
            guards.remove(session);
        }
    }

    /// Number of sessions with a live population guard
    pub fn guard_count(&self) -> usize {
        self.guards.lock().len()
    }

    /// Remove every artifact matching `{session_id}*.cache`.
    ///
    /// Waits for any in-flight population of the session to finish first.
    /// Returns the number of files removed. Files removed before a failure
    /// stay removed.
    pub async fn delete(&self, session: &SessionId) -> Result<usize, CacheError> {
        let guard = self.population_guard(session);
        let result = {
            let _populating = guard.lock().await;
            self.remove_artifacts(session).await
        };
        self.release_guard(session, guard);
        result
    }

    async fn remove_artifacts(&self, session: &SessionId) -> Result<usize, CacheError> {
        let matches = self.matching_artifacts(session).await?;
        if matches.is_empty() {
            return Err(CacheError::NotFound {
                session: session.to_string(),
            });
        }

        let mut removed = 0;
        for path in matches {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(target: "cache", path = %path.display(), "Removed cache artifact");
                    removed += 1;
                }
                // Already gone (e.g. purged concurrently)
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::Deletion { path, source }),
            }
        }

        Ok(removed)
    }

    /// Remove the whole storage root. A missing root is not an error.
    pub async fn purge_all(&self) -> Result<(), CacheError> {
        self.guards.lock().clear();
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!(target: "cache", root = %self.root.display(), "Purged cache storage");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn matching_artifacts(&self, session: &SessionId) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let prefix = file_stem(session);
        let suffix = format!(".{}", CACHE_EXTENSION);
        let mut matches = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                matches.push(entry.path());
            }
        }

        matches.sort();
        Ok(matches)
    }
}

/// Escape a session id into a file stem.
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`, `%` included, so the mapping
/// stays injective and never produces a path separator.
fn file_stem(session: &SessionId) -> String {
    let mut stem = String::with_capacity(session.as_str().len());
    for byte in session.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}
