//! Cache reclamation.
//!
//! The storage root is created when the server starts and removed once when it
//! shuts down gracefully. In between, sessions are only reclaimed when the
//! client asks for it through `/clear_cache`; there is no idle eviction.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::cache::{CacheError, CacheStore, SessionId};

#[derive(Debug)]
pub struct LifecycleManager {
    store: CacheStore,
    purged: AtomicBool,
}

impl LifecycleManager {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            purged: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Create the storage root.
    pub async fn prepare(&self) -> Result<(), CacheError> {
        self.store.ensure_root().await?;
        info!(
            target: "lifecycle",
            root = %self.store.root().display(),
            "Cache storage ready"
        );
        Ok(())
    }

    /// Remove every artifact belonging to `session`.
    pub async fn clear_session(&self, session: &SessionId) -> Result<usize, CacheError> {
        let removed = self.store.delete(session).await?;
        info!(target: "lifecycle", session = %session, removed, "Cleared session cache");
        Ok(removed)
    }

    /// Purge the storage root. Only the first call does anything.
    ///
    /// Returns whether this call performed the purge. Failures are logged,
    /// never propagated: shutdown must proceed regardless.
    pub async fn shutdown(&self) -> bool {
        if self.purged.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.store.purge_all().await {
            Ok(()) => info!(target: "lifecycle", "Cache storage reclaimed"),
            Err(e) => error!(
                target: "lifecycle",
                root = %self.store.root().display(),
                error = %e,
                "Failed to purge cache storage"
            ),
        }
        true
    }
}
