//! Hub server list parsing
//!
//! Hubs arrive as a comma-separated `host[:port]` string from the CLI or an
//! install script's arguments. Order matters and is preserved: the first
//! entry (or an explicitly flagged one) is the primary hub used for any
//! future API calls, though that designation plays no part in tunneling.

use serde::{Deserialize, Serialize};

use crate::model::TopologyError;
use crate::DEFAULT_HUB_SSH_PORT;

/// One central hub terminating reverse tunnels from many nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubServer {
    /// Short name used in service names, derived from the host when not set
    pub name: String,
    /// Hostname or address the node dials out to
    pub host: String,
    /// SSH port on the hub
    pub ssh_port: u16,
    /// Primary hub for API traffic; metadata only, tunnels ignore it
    pub is_primary: bool,
}

impl HubServer {
    /// Parse a single `host[:port]` entry.
    pub fn parse(entry: &str) -> Result<Self, TopologyError> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(TopologyError::MalformedHub {
                entry: entry.to_string(),
            });
        }

        let (host, ssh_port) = match entry.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| TopologyError::MalformedHub {
                    entry: entry.to_string(),
                })?;
                if port == 0 {
                    return Err(TopologyError::MalformedHub {
                        entry: entry.to_string(),
                    });
                }
                (host, port)
            }
            None => (entry, DEFAULT_HUB_SSH_PORT),
        };

        if host.is_empty() {
            return Err(TopologyError::MalformedHub {
                entry: entry.to_string(),
            });
        }

        Ok(Self {
            name: derive_name(host),
            host: host.to_string(),
            ssh_port,
            is_primary: false,
        })
    }
}

/// Short service-name-safe label for a hub: first DNS label, lowercased,
/// anything outside `[a-z0-9-]` squashed to `-`.
fn derive_name(host: &str) -> String {
    let label = host.split('.').next().unwrap_or(host);
    label
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Parse a comma-separated hub list, first entry marked primary.
///
/// An empty list is a configuration error: no topology can be built with
/// zero hubs, and catching it here keeps the provisioner side-effect free
/// on bad input.
pub fn parse_hub_list(list: &str) -> Result<Vec<HubServer>, TopologyError> {
    let mut hubs = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        hubs.push(HubServer::parse(entry)?);
    }

    if hubs.is_empty() {
        return Err(TopologyError::NoHubs);
    }
    hubs[0].is_primary = true;

    Ok(hubs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_with_port() {
        let hub = HubServer::parse("hub1.example.com:2222").unwrap();
        assert_eq!(hub.host, "hub1.example.com");
        assert_eq!(hub.ssh_port, 2222);
        assert_eq!(hub.name, "hub1");
    }

    #[test]
    fn test_parse_host_default_port() {
        let hub = HubServer::parse("hub.example.com").unwrap();
        assert_eq!(hub.ssh_port, 22);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HubServer::parse("").is_err());
        assert!(HubServer::parse("hub.example.com:notaport").is_err());
        assert!(HubServer::parse("hub.example.com:0").is_err());
        assert!(HubServer::parse(":2222").is_err());
    }

    #[test]
    fn test_parse_list_order_and_primary() {
        let hubs = parse_hub_list("hub1.example.com:2222, hub2.example.com:2222").unwrap();
        assert_eq!(hubs.len(), 2);
        assert_eq!(hubs[0].name, "hub1");
        assert!(hubs[0].is_primary);
        assert_eq!(hubs[1].name, "hub2");
        assert!(!hubs[1].is_primary);
    }

    #[test]
    fn test_empty_list_is_error() {
        assert!(matches!(parse_hub_list(""), Err(TopologyError::NoHubs)));
        assert!(matches!(parse_hub_list(" , "), Err(TopologyError::NoHubs)));
    }

    #[test]
    fn test_name_sanitized() {
        let hub = HubServer::parse("Hub_One.example.com").unwrap();
        assert_eq!(hub.name, "hub-one");
    }
}
