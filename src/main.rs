//! lineserv binary: bind, serve, and block until a shutdown request.

use lineserv::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        "Starting lineserv server"
    );

    let server = Server::start(config, default_handler)?;
    server.join();

    Ok(())
}

/// Built-in application handler. Add more request tokens here.
fn default_handler(request: &str) -> Option<String> {
    match request {
        "hndlr_ping" => Some("OK <hndlr_ping>".to_string()),
        _ => None,
    }
}
