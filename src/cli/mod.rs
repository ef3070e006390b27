//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the row server
//! - `config show|path` -- inspect configuration
//! - `purge` -- remove the cache storage root while the server is down
//! - `version` -- print version info

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::cache::CacheStore;
use crate::config;

/// Truth table row server.
#[derive(Parser, Debug)]
#[command(
    name = "ttable",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serves truth table rows and session-cached true rows over HTTP"
)]
pub struct Cli {
    /// Path to the JSON5 config file (default: $TTABLE_CONFIG_PATH or ./ttable.json5).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The config file this invocation reads.
    pub fn config_path(&self) -> PathBuf {
        config::get_config_path(self.config.as_deref())
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the row server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Delete the cache storage root and every session artifact in it.
    Purge,

    /// Print version and platform information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the resolved settings (defaults and overrides applied) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `config show` subcommand.
pub fn handle_config_show(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::load_settings(config_path)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(config_path: &Path) {
    println!("{}", config_path.display());
}

/// Run the `purge` subcommand.
pub async fn handle_purge(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::load_settings(config_path)?;
    let store = CacheStore::new(&settings.cache.dir);
    store.purge_all().await?;
    println!("Removed {}", store.root().display());
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("ttable {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
