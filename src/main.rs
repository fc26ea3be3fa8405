//! Mock Pathfinder
//!
//! An ENUM DNS server answering NAPTR queries from a SQLite provisioning
//! database.

use std::sync::Arc;

use log::{error, info};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;

use mock_pathfinder::{config::ServerConfig, db::SqliteStore, errors::DnsError, query::QueryService};

#[tokio::main]
async fn main() -> Result<(), DnsError> {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    // Load configuration from environment variables
    let config = ServerConfig::from_env()?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| DnsError::Config(format!("Failed to start metrics exporter: {}", e)))?;
        info!("Metrics exporter listening on {}", addr);
    }

    // Open the provisioning database
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    let service = QueryService::new(config.query.clone(), store.clone(), store);
    service.start().await?;

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    service.close().await;
    Ok(())
}
