// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Weft directory node runtime.
//!
//! The binary in this crate runs one member of the discovery ring. The
//! pieces live here as a library so integration tests can boot real nodes
//! in-process:
//!
//! - [`config`] - CLI-assembled node settings and the strategy file
//! - [`node`] - server loop, DHT dispatch, fan-out/gather engine
//! - [`node::peers`] - outbound connections to the other ring members

pub mod config;
pub mod node;

pub use config::{DiscoveryStrategy, NodeConfig, StrategyConfig};
pub use node::{DirectoryNode, NodeError};
