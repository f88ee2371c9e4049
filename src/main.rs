//! pgany: serve the PostgreSQL wire protocol over a pluggable backend
//!
//! Features:
//! - TCP and Unix socket listeners
//! - Demo and echo query backends
//! - Configuration via CLI arguments or TOML file

use pgany::backend::{Backend, DemoBackend, EchoBackend};
use pgany::config::{BackendType, Config};
use pgany::server::Server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| format!("Invalid log level '{}': {}", config.log_level, e))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        bind_address = %config.bind_address,
        backend = ?config.backend,
        max_connections = config.max_connections,
        max_message_size = config.max_message_size,
        "Starting pgany server"
    );

    let backend: Arc<dyn Backend> = match config.backend {
        BackendType::Demo => Arc::new(DemoBackend),
        BackendType::Echo => Arc::new(EchoBackend),
    };

    Server::new(config, backend).run().await
}
