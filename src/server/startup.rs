//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so that both `main` and the
//! integration tests start a real server the same way, on a configured or
//! ephemeral port, and shut it down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::config::Settings;
use crate::lifecycle::LifecycleManager;
use crate::producer::{ProcessRowProducer, RowProducer};
use crate::rows::RowService;
use crate::server::http::{create_router, HttpConfig};

/// Everything needed to start a server.
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub http_config: HttpConfig,
    pub store: CacheStore,
    pub producer: Arc<dyn RowProducer>,
    pub window_size: usize,
}

impl ServerConfig {
    /// Assemble a config from resolved settings, backed by the evaluator
    /// binary they name.
    pub fn from_settings(settings: &Settings) -> Result<Self, std::net::AddrParseError> {
        let bind_address = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
        let producer = ProcessRowProducer::new(&settings.producer.binary)
            .with_args(settings.producer.args.clone())
            .with_timeout(settings.producer.timeout());
        Ok(ServerConfig {
            bind_address,
            http_config: HttpConfig {
                web_root: settings.web.root.clone(),
                security_headers: true,
            },
            store: CacheStore::new(&settings.cache.dir),
            producer: Arc::new(producer),
            window_size: settings.cache.window_size,
        })
    }

    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port) with the given storage root
    /// and producer.
    pub fn for_testing(store: CacheStore, producer: Arc<dyn RowProducer>) -> Self {
        ServerConfig {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_config: HttpConfig::default(),
            store,
            producer,
            window_size: crate::cache::window::DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Handle to a running server. Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    lifecycle: Arc<LifecycleManager>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Trigger graceful shutdown: stop accepting connections, wait for the
    /// server task, then purge the cache storage root.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        // Wait for the server task to finish (with a timeout to avoid hanging)
        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(target: "lifecycle", "Server task returned error: {}", e),
            Ok(Err(e)) => error!(target: "lifecycle", "Server task panicked: {}", e),
            Err(_) => warn!(target: "lifecycle", "Server task did not finish within 5s timeout"),
        }

        self.lifecycle.shutdown().await;
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Creates the storage root, binds the listener and spawns `axum::serve` as a
/// background task. Returns a [`ServerHandle`] exposing the bound address.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let lifecycle = Arc::new(LifecycleManager::new(config.store.clone()));
    lifecycle.prepare().await?;

    let rows = Arc::new(
        RowService::new(config.store, config.producer).with_window_size(config.window_size),
    );
    let app = create_router(config.http_config, rows, lifecycle.clone());

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: "lifecycle", "Listening on http://{}", local_addr);

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // Wait until the shutdown channel is set to true
                loop {
                    if *shutdown_watch.borrow() {
                        break;
                    }
                    if shutdown_watch.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        lifecycle,
        server_task,
    })
}
