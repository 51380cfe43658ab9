// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Weft directory node.
//!
//! One member of the discovery ring. Publishers, subscribers, and the
//! broker register here; subscribers and the broker look up who to connect
//! to. Any node of the ring answers any request, routing it to the owning
//! member over the DHT.
//!
//! # Usage
//!
//! ```bash
//! # Standalone (centralized) node with defaults
//! weft-discovery --config config.toml
//!
//! # One member of a four-node ring
//! weft-discovery --name disc2 --port 5552 --manifest dht.json \
//!     --expected-pubs 3 --expected-subs 2 --config config.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use weft::ring::{Manifest, Ring};
use weft_discovery::config::{DiscoveryStrategy, NodeConfig, StrategyConfig};
use weft_discovery::node::{DirectoryNode, NodeError};

/// Weft directory node - distributed discovery for the pub/sub fabric
#[derive(Parser, Debug)]
#[command(name = "weft-discovery")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node name; must match a manifest entry together with the port
    #[arg(short, long, default_value = "discovery")]
    name: String,

    /// Bind address
    #[arg(short, long, default_value = "localhost")]
    addr: String,

    /// Server port
    #[arg(short, long, default_value = "5555")]
    port: u16,

    /// Expected number of publishers in the deployment
    #[arg(short = 'P', long, default_value = "1")]
    expected_pubs: u32,

    /// Expected number of subscribers in the deployment
    #[arg(short = 'S', long, default_value = "1")]
    expected_subs: u32,

    /// Ring membership manifest (JSON); unused in centralized mode
    #[arg(short = 'j', long, default_value = "dht.json")]
    manifest: PathBuf,

    /// Strategy configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::from(1);
    }

    let strategy = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading strategy configuration");
            match StrategyConfig::from_file(path) {
                Ok(strategy) => strategy,
                Err(e) => {
                    error!(error = %e, "invalid strategy configuration");
                    return ExitCode::from(1);
                }
            }
        }
        None => StrategyConfig::default(),
    };

    let ring = match strategy.discovery.strategy {
        DiscoveryStrategy::Centralized => Ring::single(&args.name, &args.addr, args.port),
        DiscoveryStrategy::Distributed => {
            let manifest = match Manifest::from_file(&args.manifest) {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(manifest = %args.manifest.display(), error = %e, "failed to load manifest");
                    return ExitCode::from(1);
                }
            };
            match Ring::load(&manifest, &args.name, args.port) {
                Ok(ring) => ring,
                Err(e) => {
                    error!(error = %e, "invalid ring manifest");
                    return ExitCode::from(1);
                }
            }
        }
    };

    let config = NodeConfig {
        name: args.name,
        bind_addr: args.addr,
        port: args.port,
        expected_pubs: args.expected_pubs,
        expected_subs: args.expected_subs,
        dissemination: strategy.dissemination.strategy,
        discovery: strategy.discovery.strategy,
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid node configuration");
        return ExitCode::from(1);
    }

    info!("Weft directory node v{}", env!("CARGO_PKG_VERSION"));
    info!(
        name = %config.name,
        endpoint = %config.bind_endpoint(),
        members = ring.len(),
        dissemination = ?config.dissemination,
        discovery = ?config.discovery,
        expected_pubs = config.expected_pubs,
        expected_subs = config.expected_subs,
        "starting"
    );

    let node = DirectoryNode::new(config, ring);
    node.log_topology();

    let handle = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping node...");
        handle.shutdown().await;
    });

    match node.run().await {
        Ok(()) => {
            info!("directory node stopped");
            ExitCode::SUCCESS
        }
        Err(NodeError::ProtocolViolations) => {
            error!("stopping after repeated protocol violations");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "directory node failed");
            ExitCode::from(1)
        }
    }
}
