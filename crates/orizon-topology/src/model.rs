//! Core data model
//!
//! Node identity, tunnel roles, port bindings, and the full per-node
//! topology. A topology is derived data: it is recomputed from
//! (identity, hubs, app ports) whenever needed and never treated as a
//! source of truth when persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hub::HubServer;

/// Errors detected while validating provisioning inputs.
///
/// All of these fire before any service, key, or file is touched.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("node id cannot be empty")]
    EmptyNodeId,

    #[error("malformed node id '{node_id}': only alphanumerics and hyphens are allowed")]
    MalformedNodeId { node_id: String },

    #[error("malformed hub entry '{entry}': expected host[:port]")]
    MalformedHub { entry: String },

    #[error("hub list is empty: at least one hub is required")]
    NoHubs,

    #[error("invalid port override for role '{role}': port cannot be zero")]
    InvalidPortOverride { role: String },

    #[error("duplicate application port entry '{role}'")]
    DuplicateAppPort { role: String },
}

/// Who this node is. Immutable once assigned at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Opaque identifier, typically a UUID; doubles as the SSH username on
    /// every hub
    pub node_id: String,
    /// Human-facing display name
    pub node_name: String,
}

impl NodeIdentity {
    /// Validate and construct an identity.
    ///
    /// The node id becomes an SSH username, a service-name component, and a
    /// filesystem path component, so it is restricted to alphanumerics and
    /// hyphens (which covers the expected UUID shape).
    pub fn new(node_id: impl Into<String>, node_name: impl Into<String>) -> Result<Self, TopologyError> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(TopologyError::EmptyNodeId);
        }
        if !node_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(TopologyError::MalformedNodeId { node_id });
        }

        let node_name = node_name.into();
        let node_name = if node_name.is_empty() {
            node_id.clone()
        } else {
            node_name
        };

        Ok(Self { node_id, node_name })
    }
}

/// Logical purpose of one forwarded port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelRole {
    /// Node metrics endpoint
    System,
    /// Local shell access (sshd)
    Terminal,
    /// Local web status page
    Https,
    /// Operator-defined application role
    App(String),
}

impl TunnelRole {
    /// Lowercase label used in POSIX service names and config files
    pub fn label(&self) -> &str {
        match self {
            TunnelRole::System => "system",
            TunnelRole::Terminal => "terminal",
            TunnelRole::Https => "https",
            TunnelRole::App(name) => name,
        }
    }

    /// CamelCase suffix used in Windows service names
    pub fn windows_suffix(&self) -> String {
        match self {
            TunnelRole::App(name) => camel_case(name),
            _ => camel_case(self.label()),
        }
    }
}

impl fmt::Display for TunnelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One reverse forward: `-R remote_port:localhost:local_port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub role: TunnelRole,
    /// Service being exposed on the node
    pub local_port: u16,
    /// Port requested on the hub via `ssh -R`
    pub remote_port: u16,
}

impl PortBinding {
    /// POSIX service name for this binding on a given hub:
    /// `orizon-tunnel-<hub>` for the System role, `orizon-tunnel-<hub>-<role>`
    /// otherwise. Unique per (node, hub, role) on a host.
    pub fn service_name(&self, hub: &HubServer) -> String {
        match &self.role {
            TunnelRole::System => format!("orizon-tunnel-{}", hub.name),
            role => format!("orizon-tunnel-{}-{}", hub.name, role.label()),
        }
    }

    /// Windows service name: `OrizonTunnel<Hub><Role>`
    pub fn windows_service_name(&self, hub: &HubServer) -> String {
        format!(
            "OrizonTunnel{}{}",
            camel_case(&hub.name),
            self.role.windows_suffix()
        )
    }
}

fn camel_case(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut upper_next = true;
    for c in label.chars() {
        if c == '-' || c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Override or addition to the built-in port map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortOverride {
    /// Local port the tunnel exposes
    pub local_port: u16,
    /// Explicit remote port; derived from the allocator when absent
    pub remote_port: Option<u16>,
}

/// Named application ports supplied at provisioning time.
///
/// Entries named `system`, `terminal`, or `https` override the built-in
/// bindings; any other name adds an [`TunnelRole::App`] binding. Backed by a
/// Vec so iteration order is insertion order — topology output must be
/// stable for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPorts {
    entries: Vec<(String, PortOverride)>,
}

impl AppPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named entry. Duplicate names and zero ports are configuration
    /// errors.
    pub fn insert(&mut self, role: impl Into<String>, ports: PortOverride) -> Result<(), TopologyError> {
        let role = role.into();
        if ports.local_port == 0 || ports.remote_port == Some(0) {
            return Err(TopologyError::InvalidPortOverride { role });
        }
        if self.entries.iter().any(|(name, _)| *name == role) {
            return Err(TopologyError::DuplicateAppPort { role });
        }
        self.entries.push((role, ports));
        Ok(())
    }

    pub fn get(&self, role: &str) -> Option<&PortOverride> {
        self.entries
            .iter()
            .find(|(name, _)| name == role)
            .map(|(_, ports)| ports)
    }

    /// Entries that are not built-in overrides, in insertion order
    pub fn app_entries(&self) -> impl Iterator<Item = (&str, &PortOverride)> {
        self.entries
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), "system" | "terminal" | "https"))
            .map(|(name, ports)| (name.as_str(), ports))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All bindings for one node on one hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubBindings {
    pub hub: HubServer,
    pub bindings: Vec<PortBinding>,
}

/// The full, deterministic tunnel layout for one node.
///
/// Recomputable from its inputs at any time. Persisted copies (the agent
/// config cache) are a convenience for uninstall and upgrade, never the
/// authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelTopology {
    pub node_id: String,
    pub hubs: Vec<HubBindings>,
}

impl TunnelTopology {
    /// Total number of bindings across all hubs
    pub fn binding_count(&self) -> usize {
        self.hubs.iter().map(|h| h.bindings.len()).sum()
    }

    /// Every (hub, binding) pair in deterministic order
    pub fn iter_bindings(&self) -> impl Iterator<Item = (&HubServer, &PortBinding)> {
        self.hubs
            .iter()
            .flat_map(|h| h.bindings.iter().map(move |b| (&h.hub, b)))
    }

    /// POSIX service names for every binding, in topology order
    pub fn service_names(&self) -> Vec<String> {
        self.iter_bindings()
            .map(|(hub, binding)| binding.service_name(hub))
            .collect()
    }
}

impl fmt::Display for TunnelTopology {
    /// Operator-facing summary table. The CLI prints this before installing
    /// and the script emitter embeds it verbatim, so an operator can verify
    /// the exact ports a script will claim before running it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node {}", self.node_id)?;
        for hub in &self.hubs {
            let primary = if hub.hub.is_primary { " (primary)" } else { "" };
            writeln!(
                f,
                "hub {} [{}:{}]{}",
                hub.hub.name, hub.hub.host, hub.hub.ssh_port, primary
            )?;
            for b in &hub.bindings {
                writeln!(
                    f,
                    "  {:<12} localhost:{} -> {}:{}",
                    b.role.label(),
                    b.local_port,
                    hub.hub.host,
                    b.remote_port
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(name: &str) -> HubServer {
        HubServer {
            name: name.to_string(),
            host: format!("{}.example.com", name),
            ssh_port: 2222,
            is_primary: false,
        }
    }

    #[test]
    fn test_identity_validation() {
        assert!(NodeIdentity::new("11111111-1111-1111-1111-111111111111", "edge-1").is_ok());
        assert!(NodeIdentity::new("node01", "").is_ok());
        assert!(matches!(
            NodeIdentity::new("", "x"),
            Err(TopologyError::EmptyNodeId)
        ));
        assert!(matches!(
            NodeIdentity::new("bad id", "x"),
            Err(TopologyError::MalformedNodeId { .. })
        ));
        assert!(NodeIdentity::new("semi;colon", "x").is_err());
    }

    #[test]
    fn test_identity_name_defaults_to_id() {
        let id = NodeIdentity::new("node01", "").unwrap();
        assert_eq!(id.node_name, "node01");
    }

    #[test]
    fn test_service_names() {
        let hub = hub("hub1");
        let system = PortBinding {
            role: TunnelRole::System,
            local_port: 9100,
            remote_port: 9123,
        };
        let terminal = PortBinding {
            role: TunnelRole::Terminal,
            local_port: 22,
            remote_port: 20123,
        };
        let app = PortBinding {
            role: TunnelRole::App("object-store".to_string()),
            local_port: 9000,
            remote_port: 21000,
        };

        assert_eq!(system.service_name(&hub), "orizon-tunnel-hub1");
        assert_eq!(terminal.service_name(&hub), "orizon-tunnel-hub1-terminal");
        assert_eq!(app.service_name(&hub), "orizon-tunnel-hub1-object-store");

        assert_eq!(system.windows_service_name(&hub), "OrizonTunnelHub1System");
        assert_eq!(
            app.windows_service_name(&hub),
            "OrizonTunnelHub1ObjectStore"
        );
    }

    #[test]
    fn test_app_ports_rejects_duplicates_and_zero() {
        let mut ports = AppPorts::new();
        ports
            .insert(
                "registry",
                PortOverride {
                    local_port: 5000,
                    remote_port: None,
                },
            )
            .unwrap();
        assert!(matches!(
            ports.insert(
                "registry",
                PortOverride {
                    local_port: 5001,
                    remote_port: None
                }
            ),
            Err(TopologyError::DuplicateAppPort { .. })
        ));
        assert!(matches!(
            ports.insert(
                "broken",
                PortOverride {
                    local_port: 0,
                    remote_port: None
                }
            ),
            Err(TopologyError::InvalidPortOverride { .. })
        ));
    }

    #[test]
    fn test_app_entries_skip_builtin_overrides() {
        let mut ports = AppPorts::new();
        ports
            .insert(
                "https",
                PortOverride {
                    local_port: 8443,
                    remote_port: None,
                },
            )
            .unwrap();
        ports
            .insert(
                "registry",
                PortOverride {
                    local_port: 5000,
                    remote_port: None,
                },
            )
            .unwrap();

        let apps: Vec<&str> = ports.app_entries().map(|(name, _)| name).collect();
        assert_eq!(apps, vec!["registry"]);
        assert!(ports.get("https").is_some());
    }
}
