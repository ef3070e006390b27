use std::path::Path;

use clap::Parser;
use tracing::{info, warn};

use ttable::cli::{self, Cli, Command, ConfigCommand};
use ttable::config::{self, Settings};
use ttable::logging;
use ttable::server::startup::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server(&config_path).await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show(&config_path)?,
                ConfigCommand::Path => cli::handle_config_path(&config_path),
            }
            Ok(())
        }

        Some(Command::Purge) => cli::handle_purge(&config_path).await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run the row server until Ctrl+C or SIGTERM, then purge the cache.
async fn run_server(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings_for_startup(config_path)?;
    logging::init_logging(logging::LogConfig::from_settings(&settings.logging))?;

    log_startup_banner(&settings, config_path);

    let server_config = ServerConfig::from_settings(&settings)?;
    let handle = run_server_with_config(server_config)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let reason = await_shutdown_trigger().await;
    info!(target: "lifecycle", "Shutdown signal received ({})", reason);
    handle.shutdown().await;

    info!(target: "lifecycle", "Server shut down");
    Ok(())
}

/// Settings are resolved before logging exists, so schema findings would be
/// lost; report the failure on stderr instead.
fn load_settings_for_startup(config_path: &Path) -> Result<Settings, Box<dyn std::error::Error>> {
    match config::load_settings(config_path) {
        Ok(settings) => Ok(settings),
        Err(e @ config::ConfigError::Invalid { .. }) => {
            let raw = config::load_config(config_path)?;
            for issue in config::schema::validate_schema(&raw) {
                eprintln!("config {:?} at {}: {}", issue.severity, issue.path, issue.message);
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn log_startup_banner(settings: &Settings, config_path: &Path) {
    info!(target: "lifecycle", "ttable v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!(target: "config", "Config: {}", config_path.display());
    } else {
        info!(target: "config", "Config: {} (not found, using defaults)", config_path.display());
    }
    info!(
        target: "lifecycle",
        "Cache root: {} (window {} rows)",
        settings.cache.dir.display(),
        settings.cache.window_size
    );
    if !settings.producer.binary.exists() {
        warn!(
            target: "producer",
            "Evaluator {} not found; row requests will fail until it is installed",
            settings.producer.binary.display()
        );
    }
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    panic!("Failed to install Ctrl+C handler: {}", e);
                }
            }
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            panic!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
