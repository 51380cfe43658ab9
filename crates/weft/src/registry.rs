// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Per-node registration state and the lookup matcher.
//!
//! Each directory node owns the records whose key hash falls in its
//! responsibility range. Records are keyed by `(topic, registrant id)`; the
//! topic index keeps registrant ids per topic in first-seen order so lookup
//! responses are deterministic. The broker slot is enforced at the single
//! node owning the broker key.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::wire::{ReadySnapshot, RegistrantInfo, Role};

/// Dissemination strategy of the deployment. Must be configured identically
/// on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dissemination {
    /// Lookups resolve to matching publisher endpoints.
    #[default]
    Direct,
    /// Lookups resolve to the single broker endpoint.
    Broker,
}

/// Node lifecycle. Transitions only move forward; `Ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initialize,
    Configure,
    Pending,
    Ready,
}

/// Refusals surfaced to clients as `FAILURE` plus reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Duplicate registrant id for an already-stored record.
    NameCollision,
    /// A second broker tried to claim the slot.
    BrokerCollision,
    /// LookupAll issued under direct dissemination.
    LookallNotPermitted,
}

impl Refusal {
    /// The exact reason string written to the wire.
    pub fn reason(self) -> &'static str {
        match self {
            Self::NameCollision => "name already exists",
            Self::BrokerCollision => "broker already exists",
            Self::LookallNotPermitted => "lookall not permitted in direct mode",
        }
    }
}

#[derive(Debug, Clone)]
struct Record {
    role: Role,
    info: RegistrantInfo,
}

/// Registration state owned by one directory node.
#[derive(Debug)]
pub struct Registry {
    dissemination: Dissemination,
    expected_pubs: u32,
    expected_subs: u32,
    state: NodeState,

    /// Records owned by this node, keyed by (topic, registrant id).
    records: HashMap<(String, String), Record>,

    /// topic -> registrant ids, first-seen order.
    topic_index: HashMap<String, Vec<String>>,

    /// Distinct registrant ids seen locally per role.
    pub_ids: HashSet<String>,
    sub_ids: HashSet<String>,

    /// Locally-owned publisher endpoints in registration order.
    publishers: Vec<RegistrantInfo>,

    /// The broker slot, filled at most once per process lifetime.
    broker: Option<RegistrantInfo>,
}

impl Registry {
    pub fn new(dissemination: Dissemination, expected_pubs: u32, expected_subs: u32) -> Self {
        Self {
            dissemination,
            expected_pubs,
            expected_subs,
            state: NodeState::Initialize,
            records: HashMap::new(),
            topic_index: HashMap::new(),
            pub_ids: HashSet::new(),
            sub_ids: HashSet::new(),
            publishers: Vec::new(),
            broker: None,
        }
    }

    pub fn dissemination(&self) -> Dissemination {
        self.dissemination
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Manifest loaded and the ring built.
    pub fn mark_configured(&mut self) {
        debug!(from = ?self.state, "node state -> Configure");
        self.state = NodeState::Configure;
    }

    /// Server endpoint bound; the node accepts requests.
    pub fn mark_bound(&mut self) {
        debug!(from = ?self.state, "node state -> Pending");
        self.state = NodeState::Pending;
    }

    /// Aggregate readiness observed. Terminal.
    pub fn mark_ready(&mut self) {
        if self.state != NodeState::Ready {
            debug!(from = ?self.state, "node state -> Ready");
            self.state = NodeState::Ready;
        }
    }

    /// Store one (topic, id) record. The routing layer only calls this on
    /// the node owning `hash("<topic>:<id>")`.
    pub fn register_topic(
        &mut self,
        role: Role,
        info: &RegistrantInfo,
        topic: &str,
    ) -> Result<(), Refusal> {
        let key = (topic.to_string(), info.id.clone());
        if self.records.contains_key(&key) {
            return Err(Refusal::NameCollision);
        }

        match role {
            Role::Publisher => {
                if self.pub_ids.insert(info.id.clone()) {
                    self.publishers.push(info.clone());
                }
            }
            Role::Subscriber => {
                self.sub_ids.insert(info.id.clone());
            }
            // Brokers go through register_broker.
            Role::Both => return Err(Refusal::NameCollision),
        }

        self.topic_index
            .entry(topic.to_string())
            .or_default()
            .push(info.id.clone());
        self.records.insert(key, Record {
            role,
            info: info.clone(),
        });
        Ok(())
    }

    /// Claim the broker slot. Only the node owning `hash("broker:<id>")`
    /// calls this.
    pub fn register_broker(&mut self, info: &RegistrantInfo) -> Result<(), Refusal> {
        match &self.broker {
            Some(existing) if existing.id == info.id => Err(Refusal::NameCollision),
            Some(_) => Err(Refusal::BrokerCollision),
            None => {
                self.broker = Some(info.clone());
                Ok(())
            }
        }
    }

    /// Local half of LookupByTopic: scan the topic index for publishers of
    /// any requested topic. Under broker dissemination the scan result is
    /// the broker slot instead; matching publishers are never exposed.
    pub fn lookup_topics(&self, topics: &[String]) -> Vec<RegistrantInfo> {
        if self.dissemination == Dissemination::Broker {
            return self.broker.clone().into_iter().collect();
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut matches = Vec::new();
        for topic in topics {
            let Some(ids) = self.topic_index.get(topic) else {
                continue;
            };
            for id in ids {
                let Some(record) = self.records.get(&(topic.clone(), id.clone())) else {
                    continue;
                };
                if record.role == Role::Publisher && seen.insert(id.as_str()) {
                    matches.push(record.info.clone());
                }
            }
        }
        matches
    }

    /// Local half of LookupAll: every locally-owned publisher, in
    /// registration order.
    pub fn local_publishers(&self) -> Vec<RegistrantInfo> {
        self.publishers.clone()
    }

    /// This node's readiness snapshot: serving state plus local counters.
    pub fn snapshot(&self) -> ReadySnapshot {
        ReadySnapshot {
            ready: matches!(self.state, NodeState::Pending | NodeState::Ready),
            pubs: self.pub_ids.len() as u32,
            subs: self.sub_ids.len() as u32,
            broker: self.broker.is_some(),
        }
    }

    /// Aggregate snapshots from every ring member (this node's included)
    /// into deployment-wide readiness.
    pub fn aggregate(&self, snapshots: &[ReadySnapshot]) -> ReadySnapshot {
        let serving = snapshots.iter().all(|s| s.ready);
        let pubs = snapshots.iter().map(|s| s.pubs).sum();
        let subs = snapshots.iter().map(|s| s.subs).sum();
        let broker = snapshots.iter().any(|s| s.broker);
        let broker_ok = self.dissemination != Dissemination::Broker || broker;

        ReadySnapshot {
            ready: serving && pubs >= self.expected_pubs && subs >= self.expected_subs && broker_ok,
            pubs,
            subs,
            broker,
        }
    }
}
