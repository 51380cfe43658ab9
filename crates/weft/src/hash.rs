// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! The 48-bit identifier space shared by nodes and registrations.
//!
//! A ring position is the big-endian value of the first 6 bytes of the
//! SHA-256 digest of a UTF-8 preimage. Two preimage domains exist: node
//! identities hash `"<name>:<port>"`, registration records hash
//! `"<topic>:<name>"`. The broker slot is a registration record in the
//! reserved `broker` topic.

use sha2::{Digest, Sha256};

/// Width of the identifier space in bits.
pub const RING_BITS: u32 = 48;

/// Number of positions on the ring (`2^48`).
pub const RING_SIZE: u64 = 1 << RING_BITS;

/// A position in the identifier space. Always `< RING_SIZE`.
pub type RingKey = u64;

/// Hash an arbitrary preimage onto the ring.
pub fn ring_hash(preimage: &str) -> RingKey {
    let digest = Sha256::digest(preimage.as_bytes());
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&digest[..6]);
    u64::from_be_bytes(bytes)
}

/// Ring position of a directory node.
pub fn node_key(name: &str, port: u16) -> RingKey {
    ring_hash(&format!("{}:{}", name, port))
}

/// Ring position owning the `(topic, registrant)` record.
pub fn record_key(topic: &str, name: &str) -> RingKey {
    ring_hash(&format!("{}:{}", topic, name))
}

/// Ring position owning the broker slot registered under `name`.
pub fn broker_key(name: &str) -> RingKey {
    record_key("broker", name)
}

/// Position `2^exp` past `hash`, wrapping at the top of the ring.
pub fn finger_start(hash: RingKey, exp: u32) -> RingKey {
    hash.wrapping_add(1 << exp) & (RING_SIZE - 1)
}

/// Whether `key` lies in the wrapping half-open interval `(start, end]`.
///
/// `start == end` denotes the full ring, as for a single-member ring whose
/// predecessor is itself.
pub fn in_range_open_closed(start: RingKey, end: RingKey, key: RingKey) -> bool {
    if start == end {
        true
    } else if start < end {
        start < key && key <= end
    } else {
        key > start || key <= end
    }
}

/// Whether `key` lies in the wrapping open interval `(start, end)`.
pub fn in_range_open_open(start: RingKey, end: RingKey, key: RingKey) -> bool {
    if start == end {
        key != start
    } else if start < end {
        start < key && key < end
    } else {
        key > start || key < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_hash_width() {
        for preimage in ["a", "weather:p1", "broker:b1", ""] {
            assert!(ring_hash(preimage) < RING_SIZE);
        }
    }

    // Reference values computed with the SHA-256 digest truncated to its
    // first 6 bytes, big-endian.
    #[test]
    fn test_known_keys() {
        assert_eq!(node_key("discovery", 5555), 0x359a_81f8_5caf);
        assert_eq!(record_key("sports", "p1"), 0x6216_3800_7a10);
        assert_eq!(broker_key("b1"), 0x5f1a_6512_eae6);
    }

    #[test]
    fn test_broker_key_is_record_key_in_broker_topic() {
        assert_eq!(broker_key("b1"), record_key("broker", "b1"));
    }

    #[test]
    fn test_finger_start_wraps() {
        assert_eq!(finger_start(0, 0), 1);
        assert_eq!(finger_start(RING_SIZE - 1, 0), 0);
        assert_eq!(finger_start(RING_SIZE - 1, 47), (1 << 47) - 1);
    }

    #[test]
    fn test_open_closed_interval() {
        assert!(in_range_open_closed(10, 20, 15));
        assert!(in_range_open_closed(10, 20, 20));
        assert!(!in_range_open_closed(10, 20, 10));
        assert!(!in_range_open_closed(10, 20, 25));
        // Wrapping interval.
        assert!(in_range_open_closed(20, 10, 5));
        assert!(in_range_open_closed(20, 10, 25));
        assert!(!in_range_open_closed(20, 10, 15));
        // Degenerate interval covers the whole ring.
        assert!(in_range_open_closed(10, 10, 10));
        assert!(in_range_open_closed(10, 10, 999));
    }

    #[test]
    fn test_open_open_interval() {
        assert!(in_range_open_open(10, 20, 15));
        assert!(!in_range_open_open(10, 20, 20));
        assert!(!in_range_open_open(10, 20, 10));
        assert!(in_range_open_open(20, 10, 0));
        assert!(!in_range_open_open(10, 10, 10));
        assert!(in_range_open_open(10, 10, 11));
    }
}
