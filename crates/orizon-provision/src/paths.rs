//! Well-known paths and privilege detection
//!
//! System-level installs (the normal case: tunnels must survive reboots of
//! an unattended node) keep everything under `/etc/orizon` and
//! `/var/log/orizon` on Unix, or `%ProgramData%\Orizon` on Windows. Without
//! elevation the same layout lives under `~/.orizon`, which is only useful
//! for user-session testing and is reported as such by the CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Whether this process can write system service configuration.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // Effective uid: installs are typically run under sudo
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    // `net session` requires administrator rights and exits non-zero
    // without them; cheaper than a winapi dependency to open the SCM.
    // If the probe itself cannot run, proceed and let sc.exe report.
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

/// Root of the agent's configuration tree
pub fn config_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let program_data =
            std::env::var("ProgramData").context("ProgramData environment variable not set")?;
        return Ok(PathBuf::from(program_data).join("Orizon"));
    }
    #[cfg(not(windows))]
    {
        if is_elevated() {
            Ok(PathBuf::from("/etc/orizon"))
        } else {
            let home = dirs::home_dir().context("failed to determine home directory")?;
            Ok(home.join(".orizon"))
        }
    }
}

/// Directory holding the node key pair
pub fn key_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("keys"))
}

/// Directory holding per-binding tunnel logs
pub fn log_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        return Ok(config_dir()?.join("logs"));
    }
    #[cfg(not(windows))]
    {
        if is_elevated() {
            Ok(PathBuf::from("/var/log/orizon"))
        } else {
            Ok(config_dir()?.join("logs"))
        }
    }
}

/// Path of the persisted agent config cache
pub fn agent_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("agent.json"))
}
