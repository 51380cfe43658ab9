// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Directory node configuration.
//!
//! Most settings arrive on the command line; the deployment-wide strategy
//! pair lives in a small TOML file every node loads identically:
//!
//! ```toml
//! [dissemination]
//! strategy = "Direct"     # or "Broker"
//!
//! [discovery]
//! strategy = "Distributed" # or "Centralized"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use weft::registry::Dissemination;

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Discovery topology: a single standalone node, or the full ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscoveryStrategy {
    /// One ring member; all routing is local and no manifest is needed.
    Centralized,
    /// Ring membership loaded from the manifest.
    #[default]
    Distributed,
}

/// The strategy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub dissemination: DisseminationTable,
    #[serde(default)]
    pub discovery: DiscoveryTable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisseminationTable {
    #[serde(default)]
    pub strategy: Dissemination,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryTable {
    #[serde(default)]
    pub strategy: DiscoveryStrategy,
}

impl StrategyConfig {
    /// Load the strategy file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Settings of one directory node, assembled from the CLI and the
/// strategy file.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name; together with the port it must match a manifest entry.
    pub name: String,
    pub bind_addr: String,
    pub port: u16,
    /// Deployment-wide expected publisher count.
    pub expected_pubs: u32,
    /// Deployment-wide expected subscriber count.
    pub expected_subs: u32,
    pub dissemination: Dissemination,
    pub discovery: DiscoveryStrategy,
}

impl NodeConfig {
    /// The server endpoint this node binds.
    pub fn bind_endpoint(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("node name cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_strategies() {
        let config = StrategyConfig::default();
        assert_eq!(config.dissemination.strategy, Dissemination::Direct);
        assert_eq!(config.discovery.strategy, DiscoveryStrategy::Distributed);
    }

    #[test]
    fn test_parse_strategy_file() {
        let text = r#"
            [dissemination]
            strategy = "Broker"

            [discovery]
            strategy = "Centralized"
        "#;
        let config: StrategyConfig = toml::from_str(text).unwrap();
        assert_eq!(config.dissemination.strategy, Dissemination::Broker);
        assert_eq!(config.discovery.strategy, DiscoveryStrategy::Centralized);
    }

    #[test]
    fn test_partial_strategy_file_uses_defaults() {
        let text = r#"
            [dissemination]
            strategy = "Broker"
        "#;
        let config: StrategyConfig = toml::from_str(text).unwrap();
        assert_eq!(config.dissemination.strategy, Dissemination::Broker);
        assert_eq!(config.discovery.strategy, DiscoveryStrategy::Distributed);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let text = r#"
            [dissemination]
            strategy = "Multicast"
        "#;
        assert!(toml::from_str::<StrategyConfig>(text).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[discovery]\nstrategy = \"Centralized\"\n").unwrap();
        let config = StrategyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.discovery.strategy, DiscoveryStrategy::Centralized);
    }

    #[test]
    fn test_node_config_validation() {
        let config = NodeConfig {
            name: "discovery".into(),
            bind_addr: "localhost".into(),
            port: 5555,
            expected_pubs: 1,
            expected_subs: 1,
            dissemination: Dissemination::Direct,
            discovery: DiscoveryStrategy::Distributed,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_endpoint(), "localhost:5555");

        let bad_port = NodeConfig { port: 0, ..config.clone() };
        assert!(bad_port.validate().is_err());

        let bad_name = NodeConfig { name: String::new(), ..config };
        assert!(bad_name.validate().is_err());
    }
}
