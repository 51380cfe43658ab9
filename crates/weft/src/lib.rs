// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Weft core library.
//!
//! Weft is a topic-based publish/subscribe fabric. Producers and consumers
//! advertise interest in topics; a directory service built as a Chord-style
//! DHT over a static set of nodes matches them and either hands subscribers
//! the publisher endpoints directly or interposes a single broker.
//!
//! This crate holds everything two parties need to speak the directory
//! protocol, plus the state a directory node keeps:
//!
//! - [`wire`] - the length-delimited request/reply message format
//! - [`hash`] - the 48-bit identifier space and its SHA-256 key derivation
//! - [`ring`] - static ring membership and finger tables
//! - [`route`] - the pure forward-or-handle decision for keyed requests
//! - [`registry`] - per-node registration state and the lookup matcher
//! - [`client`] - async client used by publisher/subscriber/broker apps
//!
//! The directory node runtime itself (sockets, fan-out, timers) lives in the
//! `weft-discovery` binary crate.

pub mod client;
pub mod hash;
pub mod registry;
pub mod ring;
pub mod route;
pub mod wire;

pub use registry::{Dissemination, NodeState, Registry};
pub use wire::{RegistrantInfo, Role, Status};
