// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Static ring membership and finger tables.
//!
//! Membership comes from a JSON manifest every directory node loads at
//! startup: `{ "dht": [ { "id", "IP", "port", "hash" }, ... ] }`. Hashes are
//! assigned by the deployment tooling and must be unique values below
//! `2^48`; the ring never recomputes them. Membership is frozen for the
//! process lifetime, so the ring is a sorted vector and every derived
//! structure is read-only after construction.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::hash::{self, RingKey, RING_BITS, RING_SIZE};

/// One entry of the membership manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "IP")]
    pub ip: String,
    pub port: u16,
    pub hash: u64,
}

/// The `dht.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub dht: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse a manifest from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, RingError> {
        serde_json::from_str(text).map_err(|e| RingError::Parse(e.to_string()))
    }

    /// Load a manifest from a file.
    pub fn from_file(path: &Path) -> Result<Self, RingError> {
        let text = std::fs::read_to_string(path).map_err(|e| RingError::Io(e.to_string()))?;
        Self::from_json(&text)
    }
}

/// A directory node as seen on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub hash: RingKey,
}

impl Member {
    /// The member's server endpoint in `ip:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Manifest and membership errors. All fatal at startup.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("I/O error reading manifest: {0}")]
    Io(String),

    #[error("manifest parse error: {0}")]
    Parse(String),

    #[error("manifest has no members")]
    Empty,

    #[error("hash {hash:#x} of {id} outside the {RING_BITS}-bit identifier space")]
    HashOutOfRange { id: String, hash: u64 },

    #[error("hash collision between {a} and {b}")]
    HashCollision { a: String, b: String },

    #[error("node {name}:{port} not present in manifest")]
    LocalNodeMissing { name: String, port: u16 },
}

/// Ordered ring membership with the local node resolved.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Sorted by hash ascending.
    members: Vec<Member>,
    /// Index of the local node in `members`.
    local: usize,
}

impl Ring {
    /// Validate a manifest and resolve the local node by name and port.
    pub fn load(manifest: &Manifest, name: &str, port: u16) -> Result<Self, RingError> {
        if manifest.dht.is_empty() {
            return Err(RingError::Empty);
        }

        let mut members: Vec<Member> = Vec::with_capacity(manifest.dht.len());
        for entry in &manifest.dht {
            if entry.hash >= RING_SIZE {
                return Err(RingError::HashOutOfRange {
                    id: entry.id.clone(),
                    hash: entry.hash,
                });
            }
            members.push(Member {
                id: entry.id.clone(),
                ip: entry.ip.clone(),
                port: entry.port,
                hash: entry.hash,
            });
        }

        members.sort_by_key(|m| m.hash);
        for pair in members.windows(2) {
            if pair[0].hash == pair[1].hash {
                return Err(RingError::HashCollision {
                    a: pair[0].id.clone(),
                    b: pair[1].id.clone(),
                });
            }
        }

        let local = members
            .iter()
            .position(|m| m.id == name && m.port == port)
            .ok_or_else(|| RingError::LocalNodeMissing {
                name: name.to_string(),
                port,
            })?;

        Ok(Self { members, local })
    }

    /// A single-member ring for centralized deployments. The hash is
    /// derived from the node's own name and port.
    pub fn single(name: &str, ip: &str, port: u16) -> Self {
        Self {
            members: vec![Member {
                id: name.to_string(),
                ip: ip.to_string(),
                port,
                hash: hash::node_key(name, port),
            }],
            local: 0,
        }
    }

    /// The local node's entry.
    pub fn local(&self) -> &Member {
        &self.members[self.local]
    }

    /// All members in hash order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// All members except the local node, in hash order.
    pub fn remote_members(&self) -> impl Iterator<Item = &Member> {
        let local = self.local;
        self.members
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != local)
            .map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member whose hash is the smallest value `>= key`, wrapping.
    pub fn successor(&self, key: RingKey) -> &Member {
        let idx = self.members.partition_point(|m| m.hash < key);
        &self.members[idx % self.members.len()]
    }

    /// The member immediately before `member` in hash order, wrapping.
    pub fn predecessor(&self, member: &Member) -> &Member {
        let idx = self
            .members
            .binary_search_by_key(&member.hash, |m| m.hash)
            .unwrap_or(0);
        &self.members[(idx + self.members.len() - 1) % self.members.len()]
    }

    /// The member owning `key`: the successor of `key` on the ring.
    pub fn owner_of(&self, key: RingKey) -> &Member {
        self.successor(key)
    }

    /// Whether `key` falls in `member`'s responsibility range
    /// `(predecessor, member]`.
    pub fn owns(&self, member: &Member, key: RingKey) -> bool {
        let pred = self.predecessor(member);
        hash::in_range_open_closed(pred.hash, member.hash, key)
    }

    /// Look up a member by its ring hash.
    pub fn member_by_hash(&self, hash: RingKey) -> Option<&Member> {
        self.members
            .binary_search_by_key(&hash, |m| m.hash)
            .ok()
            .map(|i| &self.members[i])
    }
}

/// Per-node routing shortcuts: entry `i` is the hash of
/// `successor((h + 2^i) mod 2^48)`. Entry 0 is always the immediate
/// successor. Computed once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct FingerTable {
    entries: Vec<RingKey>,
}

impl FingerTable {
    /// Build the local node's finger table.
    pub fn build(ring: &Ring) -> Self {
        Self::build_for(ring, ring.local().hash)
    }

    /// Build the finger table of the member at `hash`. Used directly by
    /// routing simulations; nodes only ever build their own.
    pub fn build_for(ring: &Ring, hash: RingKey) -> Self {
        let entries = (0..RING_BITS)
            .map(|i| ring.successor(hash::finger_start(hash, i)).hash)
            .collect();
        Self { entries }
    }

    /// Hash of the immediate successor.
    pub fn successor(&self) -> RingKey {
        self.entries[0]
    }

    pub fn entries(&self) -> &[RingKey] {
        &self.entries
    }
}
