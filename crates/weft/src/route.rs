// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Pure routing decisions for keyed requests.
//!
//! The directory node's request loop asks one question per keyed request:
//! handle it here, or forward it to which finger under which tag. The
//! answer depends only on read-only state (ring, finger table), so it lives
//! here as a pure function that the server runtime and the routing tests
//! share.

use crate::hash::{self, RingKey};
use crate::ring::{FingerTable, Ring};
use crate::wire::RouteMode;

/// Outcome of dispatching a keyed request at one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// The key falls in this node's responsibility range.
    Local,
    /// Forward to the member with hash `target`, tagged `mode`.
    Forward { target: RingKey, mode: RouteMode },
}

/// Decide how the local node dispatches a request routed by `key`.
pub fn decide(ring: &Ring, fingers: &FingerTable, key: RingKey) -> RouteDecision {
    decide_at(ring, ring.local().hash, fingers, key)
}

/// Decide how the member at `self_hash` dispatches a request routed by
/// `key`. The general form exists for routing simulations; a node only
/// ever dispatches as itself.
pub fn decide_at(
    ring: &Ring,
    self_hash: RingKey,
    fingers: &FingerTable,
    key: RingKey,
) -> RouteDecision {
    let member = match ring.member_by_hash(self_hash) {
        Some(m) => m,
        None => return RouteDecision::Local,
    };
    if ring.owns(member, key) {
        return RouteDecision::Local;
    }

    let successor = fingers.successor();
    // The immediate successor is authoritative for everything in
    // (self, successor]; the forward terminates there.
    if hash::in_range_open_closed(self_hash, successor, key) {
        return RouteDecision::Forward {
            target: successor,
            mode: RouteMode::ForwardSucc,
        };
    }

    match closest_preceding_finger(fingers, self_hash, key) {
        Some(finger) if finger == successor => RouteDecision::Forward {
            target: successor,
            mode: RouteMode::ForwardSucc,
        },
        Some(finger) => RouteDecision::Forward {
            target: finger,
            mode: RouteMode::ForwardPred,
        },
        // No finger strictly precedes the key; the successor is the only
        // way forward.
        None => RouteDecision::Forward {
            target: successor,
            mode: RouteMode::ForwardSucc,
        },
    }
}

/// The highest finger whose hash lies in the open interval
/// `(self_hash, key)`.
fn closest_preceding_finger(
    fingers: &FingerTable,
    self_hash: RingKey,
    key: RingKey,
) -> Option<RingKey> {
    fingers
        .entries()
        .iter()
        .rev()
        .copied()
        .find(|&finger| hash::in_range_open_open(self_hash, key, finger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::RING_SIZE;
    use crate::ring::{Manifest, ManifestEntry};

    fn ring_of(hashes: &[u64]) -> Ring {
        let dht: Vec<ManifestEntry> = hashes
            .iter()
            .enumerate()
            .map(|(i, &h)| ManifestEntry {
                id: format!("d{}", i),
                ip: "127.0.0.1".into(),
                port: 5000 + i as u16,
                hash: h,
            })
            .collect();
        Ring::load(&Manifest { dht }, "d0", 5000).unwrap()
    }

    /// Walk a key from `source` to its owner, counting forwards.
    fn hops_to_owner(ring: &Ring, source: u64, key: u64) -> usize {
        let mut at = source;
        let mut hops = 0;
        loop {
            let fingers = FingerTable::build_for(ring, at);
            match decide_at(ring, at, &fingers, key) {
                RouteDecision::Local => {
                    assert_eq!(
                        ring.owner_of(key).hash,
                        at,
                        "terminated at a non-owner for key {key:#x}"
                    );
                    return hops;
                }
                RouteDecision::Forward { target, mode: _ } => {
                    assert_ne!(target, at, "self-forward for key {key:#x}");
                    at = target;
                    hops += 1;
                    assert!(hops <= ring.len(), "routing loop for key {key:#x}");
                }
            }
        }
    }

    #[test]
    fn test_local_when_key_owned() {
        let ring = ring_of(&[100, 200, 300]);
        let fingers = FingerTable::build_for(&ring, 100);
        // d0 at 100 owns (300, 100].
        assert_eq!(decide_at(&ring, 100, &fingers, 50), RouteDecision::Local);
        assert_eq!(decide_at(&ring, 100, &fingers, 100), RouteDecision::Local);
        assert_eq!(decide_at(&ring, 100, &fingers, 350), RouteDecision::Local);
    }

    #[test]
    fn test_forward_to_successor_is_terminal() {
        let ring = ring_of(&[100, 200, 300]);
        let fingers = FingerTable::build_for(&ring, 100);
        assert_eq!(
            decide_at(&ring, 100, &fingers, 150),
            RouteDecision::Forward {
                target: 200,
                mode: RouteMode::ForwardSucc
            }
        );
    }

    #[test]
    fn test_forward_far_key_uses_preceding_finger() {
        // Spread nodes so a far key crosses a non-successor finger.
        let hashes: Vec<u64> = (0..16).map(|i| i * (RING_SIZE / 16) + 5).collect();
        let ring = ring_of(&hashes);
        let source = hashes[0];
        let fingers = FingerTable::build_for(&ring, source);
        // A key owned by the node halfway around the ring.
        let key = hashes[8];
        match decide_at(&ring, source, &fingers, key) {
            RouteDecision::Forward { target, mode } => {
                assert_ne!(target, fingers.successor());
                assert_eq!(mode, RouteMode::ForwardPred);
            }
            RouteDecision::Local => panic!("far key decided local"),
        }
    }

    #[test]
    fn test_every_key_terminates_at_owner() {
        let ring = ring_of(&[0x1000, 0x2000, 0x8000, 0xf000_0000_0000]);
        let keys = [
            0u64,
            0x0fff,
            0x1000,
            0x1001,
            0x7fff,
            0x8000,
            0x8001,
            0xf000_0000_0000,
            0xffff_ffff_ffff,
        ];
        for member in ring.members() {
            for &key in &keys {
                hops_to_owner(&ring, member.hash, key);
            }
        }
    }

    // A 16-member ring routes every (source, key) pair within
    // ceil(log2(16)) + 1 = 5 forwards.
    #[test]
    fn test_hop_bound_sixteen_nodes() {
        let hashes: Vec<u64> = (0..16u64)
            .map(|i| (i * 0x1000_0000_0000 + 0x0123_4567_89ab) & (RING_SIZE - 1))
            .collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        let ring = ring_of(&sorted);

        let mut keys: Vec<u64> = sorted
            .iter()
            .flat_map(|&h| [h, h.wrapping_sub(1) & (RING_SIZE - 1), (h + 1) & (RING_SIZE - 1)])
            .collect();
        keys.extend((0..64u64).map(|i| i * (RING_SIZE / 64) + 17));

        for member in ring.members() {
            for &key in &keys {
                let hops = hops_to_owner(&ring, member.hash, key);
                assert!(
                    hops <= 5,
                    "{} forwards from {:#x} to key {:#x}",
                    hops,
                    member.hash,
                    key
                );
            }
        }
    }

    #[test]
    fn test_single_member_always_local() {
        let ring = Ring::single("discovery", "127.0.0.1", 5555);
        let fingers = FingerTable::build(&ring);
        for key in [0u64, 42, RING_SIZE - 1] {
            assert_eq!(decide(&ring, &fingers, key), RouteDecision::Local);
        }
    }
}
