//! Service manager abstraction
//!
//! One interface over systemd, launchd, and the Windows SCM so the
//! provisioner never branches on platform. One adapter per platform,
//! selected by compile target.

use anyhow::Result;
use orizon_topology::{HubServer, PortBinding};
use std::path::PathBuf;

/// Everything an adapter needs to register one supervised tunnel process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Platform-appropriate service name, unique per (node, hub, role)
    pub name: String,
    /// Human-readable description shown by the service manager
    pub description: String,
    /// Executable, resolved via PATH (`ssh`)
    pub program: String,
    pub args: Vec<String>,
    /// Per-binding log file
    pub log_path: PathBuf,
    /// Fixed restart delay, seconds
    pub restart_delay_secs: u32,
}

/// Observed state of one tunnel service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    NotInstalled,
    Stopped,
    Starting,
    Running,
    Failed,
    /// Dead, waiting out the restart delay
    BackingOff,
}

/// Platform service manager operations the provisioner relies on.
///
/// `install` only registers and enables; pairing it with `start` is the
/// provisioner's job. `remove` must tolerate a stopped or half-removed
/// service so uninstall can sweep convention-matched leftovers.
pub trait ServiceManager {
    fn install(&self, definition: &ServiceDefinition) -> Result<()>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
    fn status(&self, name: &str) -> Result<ServiceStatus>;

    /// Names of every installed service starting with `prefix`, the
    /// node's service-naming convention. Drives uninstall.
    fn installed(&self, prefix: &str) -> Result<Vec<String>>;

    /// Service name for one binding in this platform's convention
    fn name_for(&self, hub: &HubServer, binding: &PortBinding) -> String {
        binding.service_name(hub)
    }

    /// Name prefix matching every service this agent may have created
    fn node_prefix(&self) -> &str {
        "orizon-tunnel-"
    }
}

/// The adapter for the platform this binary was built for.
#[cfg(target_os = "linux")]
pub fn native_manager() -> Result<Box<dyn ServiceManager>> {
    Ok(Box::new(crate::systemd::SystemdManager::new()))
}

#[cfg(target_os = "macos")]
pub fn native_manager() -> Result<Box<dyn ServiceManager>> {
    Ok(Box::new(crate::launchd::LaunchdManager::new()))
}

#[cfg(target_os = "windows")]
pub fn native_manager() -> Result<Box<dyn ServiceManager>> {
    Ok(Box::new(crate::windows::WindowsServiceManager::new()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn native_manager() -> Result<Box<dyn ServiceManager>> {
    anyhow::bail!("no service manager adapter for this platform")
}
