//! Tunnel Topology Definitions
//!
//! This crate defines the node identity and hub data model, the deterministic
//! port allocator, and the topology builder for the Orizon tunnel system.
//!
//! Everything here is pure: given the same node identity, hub list, and
//! application port map, the same topology comes out, byte for byte. The
//! native provisioner and every generated install script consume this one
//! implementation, so hub-side expectations and agent-side behavior cannot
//! drift apart.

pub mod allocator;
pub mod builder;
pub mod hub;
pub mod model;

pub use allocator::{hash32, DerivedPorts, PortAllocator};
pub use builder::build;
pub use hub::{parse_hub_list, HubServer};
pub use model::{
    AppPorts, HubBindings, NodeIdentity, PortBinding, PortOverride, TopologyError, TunnelRole,
    TunnelTopology,
};

/// Base of the system-metrics remote port range (9000..=9999)
pub const SYSTEM_PORT_BASE: u16 = 9000;

/// Width of the system-metrics remote port range
pub const SYSTEM_PORT_SPAN: u32 = 1000;

/// Base of the terminal/app remote port range (10000..=59999)
pub const DYNAMIC_PORT_BASE: u16 = 10000;

/// Width of the terminal/app remote port range
pub const DYNAMIC_PORT_SPAN: u32 = 50000;

/// Default SSH port on a hub when the hub list omits one
pub const DEFAULT_HUB_SSH_PORT: u16 = 22;

/// Default local port exposed by the System role (node metrics endpoint)
pub const DEFAULT_SYSTEM_LOCAL_PORT: u16 = 9100;

/// Default local port exposed by the Terminal role (local sshd)
pub const DEFAULT_TERMINAL_LOCAL_PORT: u16 = 22;

/// Default local port exposed by the Https role (local status page)
pub const DEFAULT_HTTPS_LOCAL_PORT: u16 = 443;
