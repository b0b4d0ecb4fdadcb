//! DICOM honeypot
//!
//! Emulates a PACS: answers C-ECHO, accepts C-FIND, C-MOVE and C-GET
//! queries without ever matching anything, and logs who connected and what
//! they asked for.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: listen on 127.0.0.1:11112 as AE "radiant"
//! dicompot
//!
//! # With a TOML configuration
//! RUST_LOG=debug dicompot /etc/dicompot.toml
//! ```

use async_trait::async_trait;
use dicompot::config::ProviderConfig;
use dicompot::error::Result;
use dicompot::io::services::describe_elements;
use dicompot::io::{QueryHandler, QueryRequest, RetrieveHandler, RetrieveItem, ServiceProvider};
use dicompot::protocol::dataset::Element;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Logs the query and reports no matches
struct EmptyArchive;

#[async_trait]
impl QueryHandler for EmptyArchive {
    async fn find(&self, request: QueryRequest, _matches: mpsc::Sender<Vec<Element>>) -> Result<()> {
        info!(
            id = %request.session_id,
            peer = ?request.connection.peer_addr,
            sop_class = %request.sop_class_uid,
            query = %describe_elements(&request.elements),
            "Search terms"
        );
        Ok(())
    }
}

#[async_trait]
impl RetrieveHandler for EmptyArchive {
    async fn retrieve(&self, request: QueryRequest, _items: mpsc::Sender<RetrieveItem>) -> Result<()> {
        info!(
            id = %request.session_id,
            peer = ?request.connection.peer_addr,
            sop_class = %request.sop_class_uid,
            destination = ?request.move_destination,
            query = %describe_elements(&request.elements),
            "Retrieve terms"
        );
        Ok(())
    }
}

fn load_config() -> Result<ProviderConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            ProviderConfig::from_file(path)
        }
        None => Ok(ProviderConfig::default()),
    }
}

async fn run() -> Result<()> {
    let config = load_config()?;
    let archive = Arc::new(EmptyArchive);
    let provider = ServiceProvider::bind(config)
        .await?
        .with_echo()
        .with_find(archive.clone())
        .with_get(archive.clone())
        .with_move(archive);

    tokio::select! {
        _ = provider.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "dicompot failed");
        std::process::exit(1);
    }
}
