//! systemd adapter (Linux)
//!
//! Writes system-level unit files under `/etc/systemd/system` and drives
//! them with `systemctl`. Units restart unconditionally: a tunnel that
//! should run forever exiting voluntarily is itself an error condition, so
//! `Restart=always` with a fixed `RestartSec` is the whole policy.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

use crate::service::{ServiceDefinition, ServiceManager, ServiceStatus};

pub struct SystemdManager {
    unit_dir: PathBuf,
}

impl SystemdManager {
    pub fn new() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }

    #[cfg(test)]
    fn with_unit_dir(unit_dir: PathBuf) -> Self {
        Self { unit_dir }
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    /// Render the unit file for one tunnel binding.
    pub fn render_unit(definition: &ServiceDefinition) -> String {
        let exec_start = std::iter::once(definition.program.as_str())
            .chain(definition.args.iter().map(String::as_str))
            .map(quote_unit_arg)
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            r#"[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exec_start}
Restart=always
RestartSec={restart_delay}
StandardOutput=append:{log}
StandardError=append:{log}

[Install]
WantedBy=multi-user.target
"#,
            description = definition.description,
            exec_start = exec_start,
            restart_delay = definition.restart_delay_secs,
            log = definition.log_path.display(),
        )
    }

    fn systemctl(args: &[&str]) -> Result<std::process::Output> {
        Command::new("systemctl")
            .args(args)
            .output()
            .context("failed to execute systemctl")
    }

    fn daemon_reload() -> Result<()> {
        let output = Self::systemctl(&["daemon-reload"])?;
        if !output.status.success() {
            anyhow::bail!(
                "systemctl daemon-reload failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Default for SystemdManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for SystemdManager {
    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        if let Some(log_dir) = definition.log_path.parent() {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
        }

        let unit_path = self.unit_path(&definition.name);
        fs::write(&unit_path, Self::render_unit(definition))
            .with_context(|| format!("failed to write unit file {:?}", unit_path))?;
        debug!(unit = %unit_path.display(), "wrote systemd unit");

        Self::daemon_reload()?;

        let output = Self::systemctl(&["enable", &definition.name])?;
        if !output.status.success() {
            anyhow::bail!(
                "failed to enable service {}: {}",
                definition.name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let output = Self::systemctl(&["start", name])?;
        if !output.status.success() {
            anyhow::bail!(
                "failed to start service {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let output = Self::systemctl(&["stop", name])?;
        if !output.status.success() {
            anyhow::bail!(
                "failed to stop service {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        // Best-effort disable; the unit may already be stopped or broken.
        if let Ok(output) = Self::systemctl(&["disable", name]) {
            if !output.status.success() {
                warn!(service = name, "systemctl disable reported failure");
            }
        }

        let unit_path = self.unit_path(name);
        if unit_path.exists() {
            fs::remove_file(&unit_path)
                .with_context(|| format!("failed to remove unit file {:?}", unit_path))?;
        }
        Self::daemon_reload()
    }

    fn status(&self, name: &str) -> Result<ServiceStatus> {
        if !self.unit_path(name).exists() {
            return Ok(ServiceStatus::NotInstalled);
        }

        let output = Self::systemctl(&["is-active", name])?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(match state.as_str() {
            "active" => ServiceStatus::Running,
            "activating" => {
                // `activating (auto-restart)` is the restart-delay window
                let detail = Self::systemctl(&["show", "-p", "SubState", "--value", name])?;
                if String::from_utf8_lossy(&detail.stdout).trim() == "auto-restart" {
                    ServiceStatus::BackingOff
                } else {
                    ServiceStatus::Starting
                }
            }
            "failed" => ServiceStatus::Failed,
            _ => ServiceStatus::Stopped,
        })
    }

    fn installed(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.unit_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(names),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(name) = file_name.strip_suffix(".service") {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Quote one ExecStart argument; systemd splits on unquoted whitespace.
fn quote_unit_arg(arg: &str) -> String {
    if arg.contains(' ') || arg.contains('"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}
