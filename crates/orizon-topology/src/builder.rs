//! Topology builder
//!
//! Expands (identity, hub list, application ports) into the full set of
//! bindings. Output is stable and order-preserving: hubs in list order, the
//! three built-in roles first, then application roles in insertion order.
//! Both the native provisioner and the script emitter consume this output,
//! and hub operators pre-declare ports from the same inputs, so any
//! reordering or non-determinism here breaks that correspondence.

use tracing::debug;

use crate::allocator::PortAllocator;
use crate::hub::HubServer;
use crate::model::{
    AppPorts, HubBindings, NodeIdentity, PortBinding, TopologyError, TunnelRole, TunnelTopology,
};
use crate::{DEFAULT_HTTPS_LOCAL_PORT, DEFAULT_SYSTEM_LOCAL_PORT, DEFAULT_TERMINAL_LOCAL_PORT};

/// Build the tunnel topology for one node.
///
/// Every hub gets the three built-in bindings (System, Terminal, Https),
/// honoring explicit overrides from `app_ports`, plus one App binding per
/// additional named entry. Fails without side effects when the hub list is
/// empty or a derived port cannot be computed.
pub fn build(
    identity: &NodeIdentity,
    hubs: &[HubServer],
    app_ports: &AppPorts,
) -> Result<TunnelTopology, TopologyError> {
    if hubs.is_empty() {
        return Err(TopologyError::NoHubs);
    }

    let derived = PortAllocator::derive(&identity.node_id)?;

    let mut bindings = Vec::new();

    let system = app_ports.get("system");
    bindings.push(PortBinding {
        role: TunnelRole::System,
        local_port: system.map_or(DEFAULT_SYSTEM_LOCAL_PORT, |p| p.local_port),
        remote_port: system
            .and_then(|p| p.remote_port)
            .unwrap_or(derived.system_port),
    });

    let terminal = app_ports.get("terminal");
    bindings.push(PortBinding {
        role: TunnelRole::Terminal,
        local_port: terminal.map_or(DEFAULT_TERMINAL_LOCAL_PORT, |p| p.local_port),
        remote_port: terminal
            .and_then(|p| p.remote_port)
            .unwrap_or(derived.terminal_port),
    });

    let https = app_ports.get("https");
    bindings.push(PortBinding {
        role: TunnelRole::Https,
        local_port: https.map_or(DEFAULT_HTTPS_LOCAL_PORT, |p| p.local_port),
        remote_port: https
            .and_then(|p| p.remote_port)
            .unwrap_or(derived.https_port),
    });

    for (role, ports) in app_ports.app_entries() {
        let remote_port = match ports.remote_port {
            Some(port) => port,
            None => PortAllocator::derive_app_port(&identity.node_id, role)?,
        };
        bindings.push(PortBinding {
            role: TunnelRole::App(role.to_string()),
            local_port: ports.local_port,
            remote_port,
        });
    }

    let topology = TunnelTopology {
        node_id: identity.node_id.clone(),
        hubs: hubs
            .iter()
            .map(|hub| HubBindings {
                hub: hub.clone(),
                bindings: bindings.clone(),
            })
            .collect(),
    };

    debug!(
        node_id = %identity.node_id,
        hubs = hubs.len(),
        bindings = topology.binding_count(),
        "built tunnel topology"
    );

    Ok(topology)
}
