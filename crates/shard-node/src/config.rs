//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shard_antiflood::{AntifloodConfig, DebugConfig};
use std::path::Path;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Peer admission control.
    #[serde(default)]
    pub antiflood: AntifloodConfig,
    /// Debug switches.
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "shard-node".to_string(),
            antiflood: AntifloodConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        if args.antiflood_disabled {
            config.antiflood.enabled = false;
        }
        if args.debug_antiflood {
            config.debug.antiflood.enabled = true;
        }

        config
            .antiflood
            .validate()
            .context("Invalid antiflood configuration")?;
        config
            .debug
            .antiflood
            .validate()
            .context("Invalid debug configuration")?;

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
