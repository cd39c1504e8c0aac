//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the server
//! - `sweep` -- run one expired-session reclamation pass and exit
//! - `config show|path` -- inspect configuration
//! - `version` -- print version info

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::resources::{FileResourceStore, ResourceStore};
use crate::sessions::SessionStore;

/// Guestpass identity and quota service.
#[derive(Parser, Debug)]
#[command(
    name = "guestpass",
    version = env!("CARGO_PKG_VERSION"),
    about = "Guestpass — visitor identity, quota, and account migration service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start,

    /// Run one expired-session sweep immediately and exit.
    Sweep {
        /// Inactivity threshold in days (default: from config).
        #[arg(long)]
        days: Option<u32>,
    },

    /// Read configuration values.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the resolved configuration as JSON.
    Show,
    /// Print the config file path.
    Path,
}

/// Print the loaded configuration.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = crate::config::load_config()?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

/// Print the config file location.
pub fn handle_config_path() {
    println!("{}", crate::config::get_config_path().display());
}

pub fn handle_version() {
    println!("guestpass {}", env!("CARGO_PKG_VERSION"));
}

/// Run one on-demand sweep against the configured state directory.
pub async fn handle_sweep(days: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = crate::config::load_config()?;
    let sweeper_config = crate::sessions::build_sweeper_config(&cfg);
    let days = days.unwrap_or(sweeper_config.inactive_days);

    let state_dir = crate::config::state_dir();
    let sessions = Arc::new(SessionStore::with_base_path(state_dir.join("identity")));
    let resources: Arc<dyn ResourceStore> = Arc::new(FileResourceStore::with_base_path(
        state_dir.join("resources"),
    ));

    let outcome = tokio::task::spawn_blocking(move || {
        crate::sessions::sweep(&sessions, resources.as_ref(), days)
    })
    .await??;

    println!(
        "swept {} session(s), {} failed (threshold: {} days)",
        outcome.swept, outcome.failed, days
    );
    Ok(())
}
