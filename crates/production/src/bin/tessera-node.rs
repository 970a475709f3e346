//! Tessera Ledger Node
//!
//! Serves client requests for one member of a Tessera cluster.
//!
//! # Usage
//!
//! ```bash
//! # Generate a signing key and print its public key for the cluster file
//! tessera-node keygen --out keys/node1.key
//!
//! # Start with configuration file
//! tessera-node run --config node1.toml
//!
//! # Override the signing key and metrics address
//! tessera-node run --config node1.toml --key /etc/tessera/node1.key --metrics-addr 127.0.0.1:9191
//! ```
//!
//! See [`tessera_production::NodeConfig`] for the configuration format.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_bft::LocalConsensus;
use tessera_production::network::resolve;
use tessera_production::{
    init_telemetry, metrics, LedgerService, NodeConfig, TelemetryConfig,
};
use tessera_types::KeyPair;
use tokio::signal;
use tracing::{error, info, warn};

/// Tessera Ledger Node
#[derive(Parser, Debug)]
#[command(name = "tessera-node")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a node
    Run {
        /// Path to configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the signing key (overrides config)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Serve metrics on this address (enables the endpoint)
        #[arg(long)]
        metrics_addr: Option<String>,

        /// Log level filter (overrides the default, RUST_LOG still wins)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Generate a signing key file and print its public key
    Keygen {
        /// Where to write the hex-encoded seed
        #[arg(short, long)]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Run {
            config,
            key,
            metrics_addr,
            log_level,
        } => run(config, key, metrics_addr, log_level).await,
        Command::Keygen { out, force } => keygen(out, force),
    }
}

async fn run(
    config_path: PathBuf,
    key: Option<PathBuf>,
    metrics_addr: Option<String>,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = NodeConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if let Some(key_path) = key {
        config.node.key_path = key_path;
    }
    if let Some(addr) = metrics_addr {
        config.metrics.enabled = true;
        config.metrics.listen_addr = addr;
    }

    let telemetry = init_telemetry(&TelemetryConfig {
        log_filter: log_level,
        metrics_addr: config.metrics_addr()?,
    })?;

    info!(node = %config.node.id, "Tessera node starting...");

    let cluster = config.load_cluster().context("Failed to load cluster")?;
    let keypair = config
        .load_keypair(&cluster)
        .context("Failed to load signing key")?;
    let member = config.member(&cluster)?;
    let quorum = cluster.quorum();
    info!(
        cluster_size = quorum.cluster_size(),
        max_faulty = quorum.max_faulty(),
        quorum = quorum.quorum(),
        public_key = %keypair.public_key().to_hex(),
        "Cluster loaded"
    );

    if !config.consensus.faulty.is_empty() {
        warn!(faulty = ?config.consensus.faulty, "Simulating faulty members");
    }
    let driver = LocalConsensus::from_cluster(config.node.id.clone(), &cluster)
        .with_faulty(config.consensus.faulty.iter().cloned())
        .with_certificate_hook(|_, conflicts| metrics::record_certificate(conflicts));

    let clients = config.client_directory();
    if clients.is_empty() {
        warn!("No clients configured, every request will be rejected");
    }
    let service = Arc::new(LedgerService::new(
        Arc::new(driver),
        clients,
        config.service_config(),
    ));

    let addr = resolve(&member.hostname, member.client_port)
        .await
        .context("Failed to resolve client address")?;
    let handle = service
        .listen(addr, keypair)
        .await
        .context("Failed to start ledger service")?;
    telemetry.set_ready(true);

    info!(addr = %handle.local_addr(), "Node started, press Ctrl+C to stop");
    shutdown_signal().await;

    info!("Initiating graceful shutdown...");
    handle.stop().await;
    info!("Node shutdown complete");
    Ok(())
}

fn keygen(out: PathBuf, force: bool) -> Result<()> {
    if out.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            out.display()
        );
    }
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let keypair = KeyPair::generate();
    fs::write(&out, keypair.seed_hex())
        .with_context(|| format!("Failed to write key file {}", out.display()))?;
    println!("{}", keypair.public_key().to_hex());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
