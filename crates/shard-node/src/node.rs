//! Node lifecycle around the antiflood components.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use shard_antiflood::{
    new_antiflood_components, AdmitChecker, AntifloodComponents, DisabledPeerValidatorMapper,
    StatusHandler,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Status handler forwarding antiflood metrics to the log.
#[derive(Debug, Default)]
pub struct TracingStatusHandler;

impl StatusHandler for TracingStatusHandler {
    fn set_u64_value(&self, metric: &str, value: u64) {
        debug!(metric, value, "Antiflood metric");
    }

    fn increment(&self, metric: &str) {
        debug!(metric, "Antiflood counter");
    }
}

/// Running node.
pub struct Node {
    config: NodeConfig,
    components: AntifloodComponents,
    cancel: CancellationToken,
}

impl Node {
    /// Build the node. Must run inside the tokio runtime.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let cancel = CancellationToken::new();
        // No validator set yet; every peer is a regular peer
        let components = new_antiflood_components(
            &config.antiflood,
            &config.debug.antiflood,
            Arc::new(TracingStatusHandler),
            Arc::new(DisabledPeerValidatorMapper),
            cancel.clone(),
        )
        .context("Failed to build antiflood components")?;

        Ok(Self {
            config,
            components,
            cancel,
        })
    }

    /// Admission entry point handed to the networking layer.
    pub fn antiflood(&self) -> Arc<dyn AdmitChecker> {
        self.components.antiflood.clone()
    }

    /// Token that stops the node.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled.
    pub async fn run(&self) {
        info!(
            node = %self.config.node_name,
            antiflood = self.antiflood().is_enabled(),
            "Node running"
        );
        self.cancel.cancelled().await;
        info!("Node main loop stopped");
    }

    /// Stop the maintenance loops and wait for them.
    pub async fn shutdown(self) {
        info!("Shutting down node...");
        self.cancel.cancel();
        self.components.shutdown().await;
        info!("Node shutdown complete");
    }
}
