//! contactlink gRPC server
//!
//! A standalone server binary for running identity resolution over gRPC.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use contactlink::integrity;
use contactlink::storage::{open_store, PersistentConfig};
use contactlink::transport::ContactLinkServiceImpl;
use contactlink::{ContactStore, IdentityResolver, InMemoryContactStore, ResolverConfig};

/// Server configuration
#[derive(Debug, Parser)]
#[command(name = "contactlink-server", version, about = "contactlink gRPC server")]
struct Config {
    /// Address to bind to
    #[arg(short, long, env = "CONTACTLINK_LISTEN", default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    /// Directory for persistent storage; omit to keep contacts in memory
    #[arg(short, long, env = "CONTACTLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Skip fsync after each WAL append
    #[arg(long, env = "CONTACTLINK_NO_SYNC")]
    no_sync: bool,

    /// Re-resolution attempts after store contention
    #[arg(long, env = "CONTACTLINK_CONFLICT_RETRIES", default_value_t = 3)]
    conflict_retries: u32,

    /// Finish merges cut short between relink and demote, and flatten any
    /// link chains, before serving
    #[arg(long)]
    repair: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("contactlink=info,contactlink_server=info")),
        )
        .with_target(false)
        .init();
}

fn open(config: &Config) -> Result<Arc<dyn ContactStore>, Box<dyn std::error::Error>> {
    let Some(dir) = &config.data_dir else {
        tracing::warn!("no --data-dir given; contacts are kept in memory only");
        return Ok(Arc::new(InMemoryContactStore::new()));
    };

    let persistent = PersistentConfig {
        sync_on_write: !config.no_sync,
    };
    // Holds an exclusive lock for the process lifetime.
    let store = open_store(dir, Some(persistent))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting contactlink server");

    let store = open(&config)?;

    if config.repair {
        let summary = integrity::repair(store.as_ref())?;
        for violation in &summary.unresolved {
            tracing::warn!(%violation, "unresolved link violation");
        }
    } else {
        let report = integrity::audit(store.as_ref())?;
        if !report.is_clean() {
            tracing::warn!(
                violations = report.violations.len(),
                "store has link violations; restart with --repair to fix them"
            );
        }
    }

    let resolver = IdentityResolver::with_config(
        store,
        ResolverConfig::default().with_conflict_retries(config.conflict_retries),
    );
    let svc = ContactLinkServiceImpl::new(Arc::new(resolver)).into_server();

    tracing::info!(addr = %config.listen, "serving gRPC");

    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(config.listen, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("shut down");
    Ok(())
}
