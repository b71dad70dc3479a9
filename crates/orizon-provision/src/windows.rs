//! Windows SCM adapter
//!
//! Registers each tunnel as a Windows service via `sc.exe`: `create` with
//! auto start, `failure` to restart unconditionally after the fixed delay,
//! `start`/`stop`/`delete` for lifecycle. The SCM has no log redirection of
//! its own, so the ssh invocation gets `-E <log>` appended here.
//!
//! Service names use the `OrizonTunnel<Hub><Role>` convention.

use anyhow::{Context, Result};
use orizon_topology::{HubServer, PortBinding};
use std::process::Command;
use tracing::warn;

use crate::service::{ServiceDefinition, ServiceManager, ServiceStatus};

pub struct WindowsServiceManager;

impl WindowsServiceManager {
    pub fn new() -> Self {
        Self
    }

    /// The quoted binPath= value for one tunnel service
    pub fn render_bin_path(definition: &ServiceDefinition) -> String {
        let mut parts = vec![definition.program.clone()];
        parts.extend(definition.args.iter().cloned());
        parts.push("-E".to_string());
        parts.push(definition.log_path.to_string_lossy().to_string());
        parts
            .iter()
            .map(|part| {
                if part.contains(' ') {
                    format!("\\\"{}\\\"", part)
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn sc(args: &[&str]) -> Result<std::process::Output> {
        Command::new("sc.exe")
            .args(args)
            .output()
            .context("failed to execute sc.exe")
    }
}

impl Default for WindowsServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for WindowsServiceManager {
    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        if let Some(log_dir) = definition.log_path.parent() {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
        }

        let bin_path = Self::render_bin_path(definition);
        let output = Self::sc(&[
            "create",
            &definition.name,
            &format!("binPath= {}", bin_path),
            "start= auto",
            &format!("DisplayName= {}", definition.description),
        ])?;
        if !output.status.success() {
            anyhow::bail!(
                "sc.exe create {} failed: {}",
                definition.name,
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        // Restart forever after the fixed delay, regardless of exit code.
        let delay_ms = definition.restart_delay_secs * 1000;
        let actions = format!(
            "actions= restart/{}/restart/{}/restart/{}",
            delay_ms, delay_ms, delay_ms
        );
        let output = Self::sc(&["failure", &definition.name, "reset= 0", &actions])?;
        if !output.status.success() {
            anyhow::bail!(
                "sc.exe failure {} failed: {}",
                definition.name,
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let output = Self::sc(&["start", name])?;
        if !output.status.success() {
            anyhow::bail!(
                "sc.exe start {} failed: {}",
                name,
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let output = Self::sc(&["stop", name])?;
        if !output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            // 1062: service not started
            if !text.contains("1062") {
                anyhow::bail!("sc.exe stop {} failed: {}", name, text.trim());
            }
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        if let Err(err) = self.stop(name) {
            warn!(service = name, error = %err, "ignoring stop failure during removal");
        }
        let output = Self::sc(&["delete", name])?;
        if !output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            // 1060: service does not exist
            if !text.contains("1060") {
                anyhow::bail!("sc.exe delete {} failed: {}", name, text.trim());
            }
        }
        Ok(())
    }

    fn status(&self, name: &str) -> Result<ServiceStatus> {
        let output = Self::sc(&["query", name])?;
        let text = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            if text.contains("1060") {
                return Ok(ServiceStatus::NotInstalled);
            }
            anyhow::bail!("sc.exe query {} failed: {}", name, text.trim());
        }
        Ok(if text.contains("RUNNING") {
            ServiceStatus::Running
        } else if text.contains("START_PENDING") {
            ServiceStatus::Starting
        } else {
            ServiceStatus::Stopped
        })
    }

    fn installed(&self, prefix: &str) -> Result<Vec<String>> {
        let output = Self::sc(&["query", "type=", "service", "state=", "all"])?;
        let text = String::from_utf8_lossy(&output.stdout);
        let mut names: Vec<String> = text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("SERVICE_NAME:"))
            .map(|name| name.trim().to_string())
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    fn name_for(&self, hub: &HubServer, binding: &PortBinding) -> String {
        binding.windows_service_name(hub)
    }

    fn node_prefix(&self) -> &str {
        "OrizonTunnel"
    }
}
