//! Tunnel service provisioning
//!
//! Turns a [`orizon_topology::TunnelTopology`] into supervised,
//! auto-restarting OS services, one per (hub, binding) pair. The tunnels
//! themselves are plain `ssh -N -R` processes; everything about keeping them
//! alive — start at boot, restart after a fixed delay regardless of exit
//! code, log capture — is delegated to the host's native service manager
//! (systemd, launchd, or the Windows SCM) behind one [`ServiceManager`]
//! trait.
//!
//! Provisioning is synchronous and single-threaded. Once the services are
//! registered this process has no further role: each tunnel blocks for its
//! whole lifetime and is restarted by the service manager observing its
//! exit, never by us.

pub mod launchd;
pub mod paths;
pub mod provisioner;
pub mod service;
pub mod store;
pub mod systemd;
pub mod windows;

pub use launchd::LaunchdManager;
pub use provisioner::{ssh_forward_args, AgentProvisioner, ProvisionReport};
pub use service::{native_manager, ServiceDefinition, ServiceManager, ServiceStatus};
pub use store::{AgentRecord, AgentStore};
pub use systemd::SystemdManager;
pub use windows::WindowsServiceManager;

/// Fixed delay before the service manager restarts a dead tunnel, seconds.
///
/// This is the system's entire failure-recovery policy: no backoff, no
/// circuit breaker, no distinction between an unreachable hub and a
/// decommissioned one. The agent cannot safely infer permanence, so every
/// exit is retried forever at this cadence.
pub const RESTART_DELAY_SECS: u32 = 10;

/// Keepalive probe interval inside each SSH session, seconds
pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// Missed keepalive probes before the SSH client declares the link dead
pub const KEEPALIVE_MAX_MISSES: u32 = 3;
