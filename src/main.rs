use std::sync::Arc;

use tracing::{error, info};

use feedpulse::jobs::{ensure_renewal_job, spawn_workers};
use feedpulse::web::{AppState, CallbackServer};
use feedpulse::{Config, Database};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = feedpulse::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedpulse::logging::init_console_only(&config.logging.level);
    }

    info!("FeedPulse - feed synchronization scheduler");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ensure_renewal_job(&db, &config.websub).await {
        error!("Failed to create renewal job: {e}");
        std::process::exit(1);
    }

    let _workers = match spawn_workers(db.clone(), &config) {
        Ok(handles) => {
            info!("Started {} job worker(s)", handles.len());
            handles
        }
        Err(e) => {
            error!("Failed to start workers: {e}");
            std::process::exit(1);
        }
    };

    let state = match AppState::new(db, config.websub.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to build listener state: {e}");
            std::process::exit(1);
        }
    };

    let server = match CallbackServer::new(&config.server, state) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to configure callback listener: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Callback listener error: {e}");
        std::process::exit(1);
    }
}
