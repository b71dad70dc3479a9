//! Install script emission
//!
//! Renders a node's topology into a self-contained install script for a
//! target platform, for nodes the operator cannot run the native agent
//! binary on. The scripts are independent implementations of the same
//! contract, which is exactly where silent divergence would creep in, so
//! two defenses are built into every emitted script:
//!
//! 1. The port values are embedded as literals taken straight from the one
//!    canonical [`orizon_topology::build`] output — the emitter never does
//!    its own arithmetic.
//! 2. The script re-derives the built-in ports at run time with the same
//!    SHA-256 formula and refuses to proceed if the result differs from the
//!    embedded values. A hand-edited node id or a drifted formula aborts
//!    the install instead of silently claiming the wrong hub ports.
//!
//! Each script opens with the same human-readable topology summary the CLI
//! prints, so an operator can verify the exact ports before execution.

mod powershell;
mod sh;

use orizon_topology::{
    build, AppPorts, HubServer, NodeIdentity, PortAllocator, TopologyError, TunnelTopology,
};
use tracing::debug;

/// Script target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPlatform {
    /// POSIX shell; dispatches between systemd and launchd at run time
    Sh,
    /// Windows PowerShell driving sc.exe
    PowerShell,
}

impl ScriptPlatform {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sh" | "shell" | "linux" | "macos" | "posix" => Some(Self::Sh),
            "powershell" | "windows" | "ps1" => Some(Self::PowerShell),
            _ => None,
        }
    }
}

/// Render an install script reproducing the native provisioner's exact
/// port decisions for the same inputs.
pub fn render(
    platform: ScriptPlatform,
    identity: &NodeIdentity,
    hubs: &[HubServer],
    app_ports: &AppPorts,
) -> Result<String, TopologyError> {
    let topology = build(identity, hubs, app_ports)?;
    let derived = PortAllocator::derive(&identity.node_id)?;
    debug!(
        node_id = %identity.node_id,
        ?platform,
        bindings = topology.binding_count(),
        "rendering install script"
    );
    Ok(match platform {
        ScriptPlatform::Sh => sh::render(identity, &topology, derived),
        ScriptPlatform::PowerShell => powershell::render(identity, &topology, derived),
    })
}

/// Topology summary rendered as a comment block
pub(crate) fn summary_comment(topology: &TunnelTopology, leader: &str) -> String {
    topology
        .to_string()
        .lines()
        .map(|line| format!("{}{}", leader, line))
        .collect::<Vec<_>>()
        .join("\n")
}
