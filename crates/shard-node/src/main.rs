//! Shard Node - P2P node hosting the antiflood subsystem.
//!
//! This is the main entry point for the shard-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Shard node with peer admission control.
#[derive(Parser, Debug, Default)]
#[command(name = "shard-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "shard-node.toml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Turn antiflood off regardless of the config file
    #[arg(long)]
    antiflood_disabled: bool,

    /// Attach the antiflood debugger
    #[arg(long)]
    debug_antiflood: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Shard Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    info!(
        node = %config.node_name,
        antiflood = config.antiflood.enabled,
        debugger = config.debug.antiflood.enabled,
        "Configuration loaded"
    );

    if let Some(path) = &args.dump_config {
        config.save(path)?;
        info!("Configuration written to {:?}", path);
        return Ok(());
    }

    let node = Node::new(config)?;
    let cancel = node.cancellation_token();

    let shutdown_signal = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        cancel.cancel();
    };

    tokio::select! {
        _ = node.run() => {}
        _ = shutdown_signal => {}
    }

    node.shutdown().await;
    info!("Shard node stopped");

    Ok(())
}
