//! Ledger server binary
//!
//! Wires configuration to a resolver and keeps it alive until shutdown.
//! The HTTP router, auth and CORS middleware live in the surrounding
//! service and mount on the resolver; `server.http.bind_address` is
//! forwarded to them.

use ledgerd::{Config, Resolver};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration: explicit file argument, else environment
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    tracing::info!(
        driver = ?config.storage.driver,
        bind_address = %config.server.http.bind_address,
        "starting ledgerd"
    );

    let resolver = Arc::new(Resolver::new(config.storage.clone()));

    // The HTTP API attaches to the resolver here.

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    resolver.close_all().await?;
    Ok(())
}
