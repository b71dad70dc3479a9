//! Agent provisioner
//!
//! Walks a topology and materializes one supervised service per binding.
//! Install is idempotent: a service with the computed name is stopped and
//! deregistered completely before its replacement is created, so at no
//! point do two running processes claim the same (local, remote, hub)
//! tuple. Failures are per-binding: each tunnel is independently useful, so
//! one hub refusing service registration does not abort the rest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use orizon_topology::{HubServer, PortBinding, TunnelTopology};
use tracing::{error, info, warn};

use crate::service::{ServiceDefinition, ServiceManager, ServiceStatus};
use crate::{KEEPALIVE_INTERVAL_SECS, KEEPALIVE_MAX_MISSES, RESTART_DELAY_SECS};

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// The ssh client arguments for one reverse-forward binding.
///
/// Key-only batch authentication, keepalive probing for dead-link
/// detection, and exit-on-forward-failure so a rejected or colliding
/// remote-port request kills the process immediately instead of leaving a
/// half-open tunnel for the service manager to misread as healthy. Host
/// keys are not checked: trust comes entirely from the key-registration
/// model, which is the system's accepted trade, not an oversight.
pub fn ssh_forward_args(
    node_id: &str,
    hub: &HubServer,
    binding: &PortBinding,
    private_key: &Path,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        private_key.to_string_lossy().to_string(),
        "-N".to_string(),
        "-p".to_string(),
        hub.ssh_port.to_string(),
        "-R".to_string(),
        format!("{}:localhost:{}", binding.remote_port, binding.local_port),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        format!("ServerAliveInterval={}", KEEPALIVE_INTERVAL_SECS),
        "-o".to_string(),
        format!("ServerAliveCountMax={}", KEEPALIVE_MAX_MISSES),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("UserKnownHostsFile={}", NULL_DEVICE),
        format!("{}@{}", node_id, hub.host),
    ]
}

/// Outcome of one provisioning run. Partial success is an accepted state.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Services registered and started, in topology order
    pub installed: Vec<String>,
    /// (service name, error) for bindings that could not be registered
    pub failed: Vec<(String, String)>,
}

impl ProvisionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Materializes topologies into supervised OS services
pub struct AgentProvisioner<'a> {
    manager: &'a dyn ServiceManager,
    log_dir: PathBuf,
}

impl<'a> AgentProvisioner<'a> {
    pub fn new(manager: &'a dyn ServiceManager, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            log_dir: log_dir.into(),
        }
    }

    /// Install and start one service per binding.
    ///
    /// Never aborts mid-topology for a single binding's failure; the report
    /// carries what worked and what did not.
    pub fn provision(
        &self,
        topology: &TunnelTopology,
        private_key: &Path,
    ) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();

        for (hub, binding) in topology.iter_bindings() {
            let name = self.manager.name_for(hub, binding);
            match self.provision_binding(&name, &topology.node_id, hub, binding, private_key) {
                Ok(()) => {
                    info!(
                        service = %name,
                        hub = %hub.host,
                        remote_port = binding.remote_port,
                        local_port = binding.local_port,
                        "tunnel service registered"
                    );
                    report.installed.push(name);
                }
                Err(err) => {
                    error!(service = %name, error = %err, "failed to register tunnel service");
                    report.failed.push((name, format!("{:#}", err)));
                }
            }
        }

        Ok(report)
    }

    fn provision_binding(
        &self,
        name: &str,
        node_id: &str,
        hub: &HubServer,
        binding: &PortBinding,
        private_key: &Path,
    ) -> Result<()> {
        // Tear down any previous incarnation first; two services must never
        // claim the same (local, remote, hub) tuple.
        if self.manager.status(name)? != ServiceStatus::NotInstalled {
            warn!(service = name, "replacing existing service");
            if let Err(err) = self.manager.stop(name) {
                warn!(service = name, error = %err, "ignoring stop failure during replacement");
            }
            self.manager
                .remove(name)
                .with_context(|| format!("failed to remove existing service {}", name))?;
        }

        let definition = ServiceDefinition {
            name: name.to_string(),
            description: format!(
                "Orizon reverse tunnel to {} ({})",
                hub.host,
                binding.role.label()
            ),
            program: "ssh".to_string(),
            args: ssh_forward_args(node_id, hub, binding, private_key),
            log_path: self.log_dir.join(format!("{}.log", name)),
            restart_delay_secs: RESTART_DELAY_SECS,
        };

        self.manager
            .install(&definition)
            .with_context(|| format!("failed to install service {}", name))?;
        self.manager
            .start(name)
            .with_context(|| format!("failed to start service {}", name))?;
        Ok(())
    }

    /// Stop and deregister every service matching the node's naming
    /// convention. Returns the names removed. On-disk configuration and
    /// keys are left alone; purging those is the CLI's explicit-request
    /// path.
    pub fn deprovision(&self) -> Result<Vec<String>> {
        let names = self.manager.installed(self.manager.node_prefix())?;
        let mut removed = Vec::new();

        for name in names {
            if let Err(err) = self.manager.stop(&name) {
                warn!(service = %name, error = %err, "ignoring stop failure during uninstall");
            }
            self.manager
                .remove(&name)
                .with_context(|| format!("failed to remove service {}", name))?;
            info!(service = %name, "tunnel service removed");
            removed.push(name);
        }

        Ok(removed)
    }

    /// Status of every service under the node's naming convention
    pub fn status(&self) -> Result<Vec<(String, ServiceStatus)>> {
        let names = self.manager.installed(self.manager.node_prefix())?;
        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            let status = self.manager.status(&name)?;
            statuses.push((name, status));
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orizon_topology::{build, parse_hub_list, AppPorts, NodeIdentity};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    const NODE_ID: &str = "11111111-1111-1111-1111-111111111111";

    /// In-memory stand-in for a platform service manager
    #[derive(Default)]
    struct FakeManager {
        services: RefCell<BTreeMap<String, ServiceDefinition>>,
        running: RefCell<BTreeMap<String, bool>>,
        install_count: RefCell<BTreeMap<String, u32>>,
        fail_install: Vec<String>,
    }

    impl ServiceManager for FakeManager {
        fn install(&self, definition: &ServiceDefinition) -> Result<()> {
            if self.fail_install.contains(&definition.name) {
                anyhow::bail!("synthetic install failure");
            }
            *self
                .install_count
                .borrow_mut()
                .entry(definition.name.clone())
                .or_insert(0) += 1;
            self.services
                .borrow_mut()
                .insert(definition.name.clone(), definition.clone());
            Ok(())
        }

        fn start(&self, name: &str) -> Result<()> {
            self.running.borrow_mut().insert(name.to_string(), true);
            Ok(())
        }

        fn stop(&self, name: &str) -> Result<()> {
            self.running.borrow_mut().insert(name.to_string(), false);
            Ok(())
        }

        fn remove(&self, name: &str) -> Result<()> {
            self.services.borrow_mut().remove(name);
            self.running.borrow_mut().remove(name);
            Ok(())
        }

        fn status(&self, name: &str) -> Result<ServiceStatus> {
            if !self.services.borrow().contains_key(name) {
                return Ok(ServiceStatus::NotInstalled);
            }
            Ok(if *self.running.borrow().get(name).unwrap_or(&false) {
                ServiceStatus::Running
            } else {
                ServiceStatus::Stopped
            })
        }

        fn installed(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .services
                .borrow()
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    fn topology() -> TunnelTopology {
        let identity = NodeIdentity::new(NODE_ID, "edge-1").unwrap();
        let hubs = parse_hub_list("hub1.example.com:2222,hub2.example.com:2222").unwrap();
        build(&identity, &hubs, &AppPorts::new()).unwrap()
    }

    fn key_path() -> PathBuf {
        PathBuf::from("/etc/orizon/keys/id_ed25519")
    }

    #[test]
    fn test_provision_registers_every_binding() {
        let manager = FakeManager::default();
        let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");

        let report = provisioner.provision(&topology(), &key_path()).unwrap();

        assert!(report.all_succeeded());
        assert_eq!(report.installed.len(), 6);
        assert_eq!(manager.services.borrow().len(), 6);
        assert!(manager.running.borrow().values().all(|running| *running));
    }

    #[test]
    fn test_reinstall_leaves_one_service_per_binding() {
        let manager = FakeManager::default();
        let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");
        let topology = topology();

        provisioner.provision(&topology, &key_path()).unwrap();
        provisioner.provision(&topology, &key_path()).unwrap();

        assert_eq!(manager.services.borrow().len(), 6);
        // Each name was installed twice but the first incarnation was
        // removed before the second went in.
        assert!(manager.install_count.borrow().values().all(|n| *n == 2));
    }

    #[test]
    fn test_partial_failure_does_not_abort_run() {
        let topology = topology();
        let victim = topology.service_names()[2].clone();
        let manager = FakeManager {
            fail_install: vec![victim.clone()],
            ..Default::default()
        };
        let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");

        let report = provisioner.provision(&topology, &key_path()).unwrap();

        assert_eq!(report.installed.len(), 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, victim);
        assert_eq!(manager.services.borrow().len(), 5);
    }

    #[test]
    fn test_deprovision_sweeps_node_namespace_only() {
        let manager = FakeManager::default();
        {
            let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");
            provisioner.provision(&topology(), &key_path()).unwrap();
        }
        // An unrelated service sharing the host must survive
        manager
            .install(&ServiceDefinition {
                name: "nginx".to_string(),
                description: "not ours".to_string(),
                program: "nginx".to_string(),
                args: vec![],
                log_path: PathBuf::from("/var/log/nginx.log"),
                restart_delay_secs: 5,
            })
            .unwrap();

        let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");
        let removed = provisioner.deprovision().unwrap();

        assert_eq!(removed.len(), 6);
        let remaining: Vec<String> = manager.services.borrow().keys().cloned().collect();
        assert_eq!(remaining, vec!["nginx"]);
    }

    #[test]
    fn test_ssh_args_request_reverse_forward() {
        let topology = topology();
        let (hub, binding) = topology.iter_bindings().next().unwrap();
        let args = ssh_forward_args(NODE_ID, hub, binding, &key_path());

        let forward = format!("{}:localhost:{}", binding.remote_port, binding.local_port);
        assert!(args.contains(&"-N".to_string()));
        assert!(args.contains(&"-R".to_string()));
        assert!(args.contains(&forward));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ExitOnForwardFailure=yes".to_string()));
        assert!(args.contains(&"ServerAliveInterval=30".to_string()));
        assert!(args.contains(&"ServerAliveCountMax=3".to_string()));
        assert_eq!(args.last().unwrap(), &format!("{}@hub1.example.com", NODE_ID));
        // The node authenticates with its key only; nothing here can fall
        // back to a password prompt.
        assert!(args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_service_log_paths_are_per_binding() {
        let manager = FakeManager::default();
        let provisioner = AgentProvisioner::new(&manager, "/var/log/orizon");
        provisioner.provision(&topology(), &key_path()).unwrap();

        let services = manager.services.borrow();
        let mut log_paths: Vec<&Path> =
            services.values().map(|d| d.log_path.as_path()).collect();
        log_paths.sort();
        log_paths.dedup();
        assert_eq!(log_paths.len(), 6);
    }
}
