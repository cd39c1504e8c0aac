use std::sync::Arc;

use clap::Parser;
use tracing::info;

use guestpass::cli::{self, Cli, Command, ConfigCommand};
use guestpass::resources::{FileResourceStore, ResourceStore};
use guestpass::sessions::SessionStore;
use guestpass::{config, identity, logging, quota, server, sessions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server().await,

        Some(Command::Sweep { days }) => cli::handle_sweep(days).await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show()?,
                ConfigCommand::Path => cli::handle_config_path(),
            }
            Ok(())
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run the service: wire stores, spawn the sweeper, serve HTTP.
async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;
    let cfg = config::load_config()?;

    let state_dir = config::state_dir();
    std::fs::create_dir_all(&state_dir)?;

    let session_store = Arc::new(SessionStore::with_base_path(state_dir.join("identity")));
    let resource_store: Arc<dyn ResourceStore> = Arc::new(FileResourceStore::with_base_path(
        state_dir.join("resources"),
    ));

    let identity_config = identity::build_identity_config(&cfg);
    let quota_config = quota::build_quota_config(&cfg);
    let sweeper_config = sessions::build_sweeper_config(&cfg);
    let server_config = server::build_server_config(&cfg);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(sessions::sweeper_loop(
        session_store.clone(),
        resource_store.clone(),
        sweeper_config,
        shutdown_rx.clone(),
    ));

    // Translate Ctrl-C into the shutdown signal.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = signal_tx.send(true);
        }
    });

    let state = server::AppState::new(
        session_store,
        resource_store,
        identity_config,
        quota_config,
    );
    server::serve(state, &server_config.bind_address(), shutdown_rx).await?;

    info!("Server shut down");
    Ok(())
}

/// Initialize logging based on the GUESTPASS_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if std::env::var("GUESTPASS_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
    {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}
