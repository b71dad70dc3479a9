//! launchd adapter (macOS)
//!
//! System daemons under `/Library/LaunchDaemons`, loaded with the modern
//! `launchctl bootstrap system` and unloaded with `bootout`, falling back to
//! legacy `load`/`unload` on older systems. `KeepAlive` plus
//! `ThrottleInterval` gives the same restart-forever-with-fixed-delay
//! behavior the systemd adapter configures.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

use crate::service::{ServiceDefinition, ServiceManager, ServiceStatus};

pub struct LaunchdManager {
    daemon_dir: PathBuf,
}

impl LaunchdManager {
    pub fn new() -> Self {
        Self {
            daemon_dir: PathBuf::from("/Library/LaunchDaemons"),
        }
    }

    #[cfg(test)]
    fn with_daemon_dir(daemon_dir: PathBuf) -> Self {
        Self { daemon_dir }
    }

    fn plist_path(&self, name: &str) -> PathBuf {
        self.daemon_dir.join(format!("{}.plist", name))
    }

    /// Render the plist for one tunnel binding. The label is the service
    /// name itself so `launchctl list | grep orizon-tunnel-` shows exactly
    /// the node's namespace.
    pub fn render_plist(definition: &ServiceDefinition) -> String {
        let mut program_args = vec![definition.program.clone()];
        program_args.extend(definition.args.iter().cloned());
        let args_xml = program_args
            .iter()
            .map(|arg| format!("        <string>{}</string>", xml_escape(arg)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{args_xml}
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>ThrottleInterval</key>
    <integer>{throttle}</integer>
    <key>StandardOutPath</key>
    <string>{log}</string>
    <key>StandardErrorPath</key>
    <string>{log}</string>
</dict>
</plist>
"#,
            label = xml_escape(&definition.name),
            args_xml = args_xml,
            throttle = definition.restart_delay_secs,
            log = definition.log_path.display(),
        )
    }

    fn launchctl(args: &[&str]) -> Result<std::process::Output> {
        Command::new("launchctl")
            .args(args)
            .output()
            .context("failed to execute launchctl")
    }
}

impl Default for LaunchdManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for LaunchdManager {
    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        if let Some(log_dir) = definition.log_path.parent() {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
        }

        let plist_path = self.plist_path(&definition.name);
        fs::write(&plist_path, Self::render_plist(definition))
            .with_context(|| format!("failed to write plist {:?}", plist_path))?;
        debug!(plist = %plist_path.display(), "wrote launchd plist");
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let plist_path = self.plist_path(name);
        let plist = plist_path.to_string_lossy().to_string();

        let output = Self::launchctl(&["bootstrap", "system", &plist])?;
        if output.status.success() {
            return Ok(());
        }

        // Older macOS, or the daemon is already bootstrapped
        let output = Self::launchctl(&["load", "-w", &plist])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("already loaded") {
                anyhow::bail!("failed to start service {}: {}", name, stderr.trim());
            }
        }
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let target = format!("system/{}", name);
        let output = Self::launchctl(&["bootout", &target])?;
        if output.status.success() {
            return Ok(());
        }

        let plist = self.plist_path(name).to_string_lossy().to_string();
        let output = Self::launchctl(&["unload", &plist])?;
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
        if let Err(err) = self.stop(name) {
            warn!(service = name, error = %err, "ignoring stop failure during removal");
        }

        let plist_path = self.plist_path(name);
        if plist_path.exists() {
            fs::remove_file(&plist_path)
                .with_context(|| format!("failed to remove plist {:?}", plist_path))?;
        }
        Ok(())
    }

    fn status(&self, name: &str) -> Result<ServiceStatus> {
        if !self.plist_path(name).exists() {
            return Ok(ServiceStatus::NotInstalled);
        }

        let output = Self::launchctl(&["list", name])?;
        if !output.status.success() {
            return Ok(ServiceStatus::Stopped);
        }
        // `launchctl list <label>` prints a PID key when the process is up;
        // a loaded job without one is between restarts.
        let text = String::from_utf8_lossy(&output.stdout);
        if text.contains("\"PID\"") {
            Ok(ServiceStatus::Running)
        } else {
            Ok(ServiceStatus::BackingOff)
        }
    }

    fn installed(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.daemon_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(names),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(name) = file_name.strip_suffix(".plist") {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn definition() -> ServiceDefinition {
        ServiceDefinition {
            name: "orizon-tunnel-hub1".to_string(),
            description: "Orizon reverse tunnel to hub1 (system)".to_string(),
            program: "ssh".to_string(),
            args: vec![
                "-N".to_string(),
                "-R".to_string(),
                "9123:localhost:9100".to_string(),
            ],
            log_path: PathBuf::from("/var/log/orizon/orizon-tunnel-hub1.log"),
            restart_delay_secs: 10,
        }
    }

    #[test]
    fn test_plist_keeps_tunnel_alive() {
        let plist = LaunchdManager::render_plist(&definition());
        assert!(plist.contains("<key>KeepAlive</key>\n    <true/>"));
        assert!(plist.contains("<key>RunAtLoad</key>\n    <true/>"));
        assert!(plist.contains("<integer>10</integer>"));
    }

    #[test]
    fn test_plist_program_arguments_ordered() {
        let plist = LaunchdManager::render_plist(&definition());
        let ssh = plist.find("<string>ssh</string>").unwrap();
        let flag = plist.find("<string>-R</string>").unwrap();
        let forward = plist.find("<string>9123:localhost:9100</string>").unwrap();
        assert!(ssh < flag && flag < forward);
    }

    #[test]
    fn test_installed_filters_by_prefix() {
        let temp = TempDir::new().unwrap();
        let manager = LaunchdManager::with_daemon_dir(temp.path().to_path_buf());

        for name in [
            "orizon-tunnel-hub1.plist",
            "com.apple.something.plist",
            "orizon-tunnel-hub2-https.plist",
        ] {
            fs::write(temp.path().join(name), "").unwrap();
        }

        let names = manager.installed("orizon-tunnel-").unwrap();
        assert_eq!(
            names,
            vec!["orizon-tunnel-hub1", "orizon-tunnel-hub2-https"]
        );
    }
}
