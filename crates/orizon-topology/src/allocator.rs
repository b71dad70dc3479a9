//! Deterministic port derivation
//!
//! Maps a node identity to its canonical remote ports on every hub. There is
//! no port registry and no handshake: the hub operator, the native installer,
//! and any generated install script all run this same formula and arrive at
//! the same numbers. Any change here is a breaking protocol change.
//!
//! Formula: take SHA-256 of the node id, interpret the first 4 bytes as a
//! big-endian u32, then
//!
//! ```text
//! system_port   = 9000  + hash % 1000
//! terminal_port = 10000 + hash % 50000
//! https_port    = terminal_port + 1
//! ```

use sha2::{Digest, Sha256};

use crate::model::TopologyError;
use crate::{DYNAMIC_PORT_BASE, DYNAMIC_PORT_SPAN, SYSTEM_PORT_BASE, SYSTEM_PORT_SPAN};

/// The three canonical remote ports derived from one node id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedPorts {
    /// Remote port for the System role (9000..=9999)
    pub system_port: u16,
    /// Remote port for the Terminal role (10000..=59999)
    pub terminal_port: u16,
    /// Remote port for the Https role, always `terminal_port + 1`
    pub https_port: u16,
}

/// Stable 32-bit hash of an identity string.
///
/// First 4 bytes of SHA-256, big-endian. Exposed because application-role
/// remote ports hash `"<node_id>:<role>"` through the same function.
pub fn hash32(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Pure node-id → port-set mapping
pub struct PortAllocator;

impl PortAllocator {
    /// Derive the canonical port set for a node.
    ///
    /// Rejects an empty node id; everything else is hashed as-is. Shape
    /// validation (UUID-ness, allowed characters) happens upstream in
    /// [`crate::model::NodeIdentity`].
    pub fn derive(node_id: &str) -> Result<DerivedPorts, TopologyError> {
        if node_id.is_empty() {
            return Err(TopologyError::EmptyNodeId);
        }

        let hash = hash32(node_id);
        let terminal_port = DYNAMIC_PORT_BASE + (hash % DYNAMIC_PORT_SPAN) as u16;

        Ok(DerivedPorts {
            system_port: SYSTEM_PORT_BASE + (hash % SYSTEM_PORT_SPAN) as u16,
            terminal_port,
            https_port: terminal_port + 1,
        })
    }

    /// Derive the remote port for a named application role.
    ///
    /// Hashes `"<node_id>:<role>"` so distinct roles on one node land on
    /// distinct (modulo collisions) ports in the dynamic range.
    pub fn derive_app_port(node_id: &str, role: &str) -> Result<u16, TopologyError> {
        if node_id.is_empty() {
            return Err(TopologyError::EmptyNodeId);
        }

        let hash = hash32(&format!("{}:{}", node_id, role));
        Ok(DYNAMIC_PORT_BASE + (hash % DYNAMIC_PORT_SPAN) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let id = "11111111-1111-1111-1111-111111111111";
        let first = PortAllocator::derive(id).unwrap();
        for _ in 0..10 {
            assert_eq!(PortAllocator::derive(id).unwrap(), first);
        }
    }

    #[test]
    fn test_derived_ports_in_range() {
        // A spread of UUID-shaped and plain identifiers
        let samples = [
            "11111111-1111-1111-1111-111111111111",
            "a3bb189e-8bf9-3888-9912-ace4e6543002",
            "00000000-0000-0000-0000-000000000000",
            "edge-node-01",
            "ffffffff-ffff-ffff-ffff-ffffffffffff",
        ];
        for id in samples {
            let ports = PortAllocator::derive(id).unwrap();
            assert!(
                (9000..=9999).contains(&ports.system_port),
                "system port out of range for {}: {}",
                id,
                ports.system_port
            );
            assert!(
                (10000..=59999).contains(&ports.terminal_port),
                "terminal port out of range for {}: {}",
                id,
                ports.terminal_port
            );
            assert_eq!(ports.https_port, ports.terminal_port + 1);
        }
    }

    #[test]
    fn test_random_uuids_stay_in_range() {
        for _ in 0..200 {
            let id = uuid::Uuid::new_v4().to_string();
            let ports = PortAllocator::derive(&id).unwrap();
            assert!((9000..=9999).contains(&ports.system_port));
            assert!((10000..=59999).contains(&ports.terminal_port));
            assert_eq!(ports.https_port, ports.terminal_port + 1);
        }
    }

    #[test]
    fn test_empty_node_id_rejected() {
        assert!(matches!(
            PortAllocator::derive(""),
            Err(TopologyError::EmptyNodeId)
        ));
        assert!(matches!(
            PortAllocator::derive_app_port("", "metrics"),
            Err(TopologyError::EmptyNodeId)
        ));
    }

    #[test]
    fn test_hash32_known_value() {
        // SHA-256("test") = 9f86d081... → 0x9f86d081
        assert_eq!(hash32("test"), 0x9f86d081);
    }

    #[test]
    fn test_app_port_depends_on_role_name() {
        let id = "11111111-1111-1111-1111-111111111111";
        let a = PortAllocator::derive_app_port(id, "metrics").unwrap();
        let b = PortAllocator::derive_app_port(id, "registry").unwrap();
        assert!((10000..=59999).contains(&a));
        assert!((10000..=59999).contains(&b));
        assert_ne!(a, b);
    }
}
