//! Tessera Ledger Client
//!
//! # Usage
//!
//! ```bash
//! # Append values, one request each
//! tessera-client --config client1.toml append hello world
//!
//! # Fetch the ledger
//! tessera-client --config client1.toml read
//!
//! # Interactive session: `append <value>`, `read`, `exit`
//! tessera-client --config client1.toml shell
//! ```
//!
//! The leader remembers every sequence number a client has used. A new
//! process starts again from 1, so pass `--first-seq` when reusing a client
//! id against a running cluster.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_client::{visible_values, ClientConfig, LedgerClient};
use tessera_production::{init_telemetry, TelemetryConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Tessera Ledger Client
#[derive(Parser, Debug)]
#[command(name = "tessera-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Log level filter (RUST_LOG still wins)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Sequence number of the first request
    #[arg(long, default_value_t = 1)]
    first_seq: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append each value to the ledger
    Append {
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Print the ledger
    Read,

    /// Read commands from stdin
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(&TelemetryConfig {
        log_filter: Some(cli.log_level.clone()),
        metrics_addr: None,
    })?;

    let config = ClientConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let mut client = LedgerClient::connect(&config)
        .await
        .context("Failed to connect to leader")?
        .with_first_seq(cli.first_seq);

    match cli.command {
        Command::Append { values } => {
            for value in values {
                append(&mut client, &value).await?;
            }
        }
        Command::Read => read(&mut client).await?,
        Command::Shell => shell(&mut client).await?,
    }

    info!(next_seq = client.next_seq(), "Client finished");
    Ok(())
}

async fn append(client: &mut LedgerClient, value: &str) -> Result<()> {
    let learned = client.append(value).await?;
    println!("New blockchain content: {:?}", visible_values(&learned));
    println!(
        "Known blockchain content: {:?}",
        visible_values(client.ledger())
    );
    Ok(())
}

async fn read(client: &mut LedgerClient) -> Result<()> {
    client.read().await?;
    println!(
        "Known blockchain content: {:?}",
        visible_values(client.ledger())
    );
    Ok(())
}

async fn shell(client: &mut LedgerClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Commands: append <value> | read | exit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "append" if !arg.trim().is_empty() => append(client, arg.trim()).await?,
            "read" => read(client).await?,
            "exit" | "quit" => break,
            _ => println!("Unknown command: {line}"),
        }
    }
    Ok(())
}
