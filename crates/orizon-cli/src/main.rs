//! Orizon CLI - provision and supervise reverse tunnels for one edge node
//!
//! `orizon install` derives the node's hub ports, generates its key pair,
//! and registers one supervised SSH reverse tunnel per (hub, role) with the
//! platform service manager. Everything after that is the service manager's
//! job; `orizon status` just reads it back.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orizon_emit::ScriptPlatform;
use orizon_hub::{HubAuthorizationEntry, ManualGate};
use orizon_keys::KeySupervisor;
use orizon_provision::{native_manager, paths, AgentProvisioner, AgentRecord, AgentStore};
use orizon_topology::{
    build, parse_hub_list, AppPorts, NodeIdentity, PortAllocator, PortOverride,
};

/// Orizon - zero-inbound-port connectivity for edge nodes
#[derive(Parser, Debug)]
#[command(name = "orizon")]
#[command(about = "Provision supervised SSH reverse tunnels to Orizon hubs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the node key and install one tunnel service per hub and role
    Install {
        /// Node identifier (UUID shape expected)
        #[arg(long, env = "ORIZON_NODE_ID")]
        node_id: String,
        /// Comma-separated hub list, host[:port]; first entry is primary
        #[arg(long, env = "ORIZON_HUBS")]
        hubs: String,
        /// Friendly node name (defaults to the node id)
        #[arg(long, default_value = "")]
        name: String,
        /// Application port, `role=local[:remote]`; repeatable. The names
        /// system/terminal/https override the built-in bindings
        #[arg(long = "app-port")]
        app_ports: Vec<String>,
    },
    /// Stop and remove every tunnel service registered by this node
    Uninstall {
        /// Also delete configuration, logs, and keys
        #[arg(long)]
        purge: bool,
    },
    /// Show the state of every installed tunnel service
    Status,
    /// Print the derived topology without touching anything
    Topology {
        /// Node identifier; defaults to the installed configuration
        #[arg(long)]
        node_id: Option<String>,
        /// Comma-separated hub list; defaults to the installed configuration
        #[arg(long)]
        hubs: Option<String>,
        /// Application port, `role=local[:remote]`; repeatable
        #[arg(long = "app-port")]
        app_ports: Vec<String>,
        /// Emit JSON instead of the summary table
        #[arg(long)]
        json: bool,
    },
    /// Node key pair operations
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Emit an install script reproducing the native port decisions exactly
    Script {
        /// Target platform: sh (Linux/macOS) or powershell (Windows)
        #[arg(long)]
        platform: String,
        /// Node identifier (UUID shape expected)
        #[arg(long, env = "ORIZON_NODE_ID")]
        node_id: String,
        /// Comma-separated hub list, host[:port]
        #[arg(long, env = "ORIZON_HUBS")]
        hubs: String,
        /// Friendly node name
        #[arg(long, default_value = "")]
        name: String,
        /// Application port, `role=local[:remote]`; repeatable
        #[arg(long = "app-port")]
        app_ports: Vec<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCommands {
    /// Print the current public key and per-hub registration instructions
    Show,
    /// Back up the current key pair and generate a replacement
    Rotate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Install {
            node_id,
            hubs,
            name,
            app_ports,
        } => handle_install(node_id, hubs, name, app_ports),
        Commands::Uninstall { purge } => handle_uninstall(purge),
        Commands::Status => handle_status(),
        Commands::Topology {
            node_id,
            hubs,
            app_ports,
            json,
        } => handle_topology(node_id, hubs, app_ports, json),
        Commands::Key { command } => match command {
            KeyCommands::Show => handle_key_show(),
            KeyCommands::Rotate => handle_key_rotate(),
        },
        Commands::Script {
            platform,
            node_id,
            hubs,
            name,
            app_ports,
            output,
        } => handle_script(platform, node_id, hubs, name, app_ports, output),
    }
}

fn handle_install(
    node_id: String,
    hub_list: String,
    name: String,
    app_port_args: Vec<String>,
) -> Result<()> {
    // Every configuration error must surface before any service, key, or
    // file is touched.
    let identity = NodeIdentity::new(node_id, name)?;
    let hubs = parse_hub_list(&hub_list)?;
    let app_ports = parse_app_ports(&app_port_args)?;
    let topology = build(&identity, &hubs, &app_ports)?;
    require_elevation()?;

    println!("Installing tunnels for the following topology:\n");
    print!("{}", topology);
    println!();

    let supervisor = KeySupervisor::new(paths::key_dir()?, &identity.node_id);
    let key_pair = supervisor
        .install()
        .context("unrecoverable key generation failure")?;

    let manager = native_manager()?;
    let provisioner = AgentProvisioner::new(manager.as_ref(), paths::log_dir()?);
    let report = provisioner.provision(&topology, &key_pair.private_key_path)?;

    let derived = PortAllocator::derive(&identity.node_id)?;
    let store = AgentStore::new(paths::agent_config_path()?);
    store.save(&AgentRecord {
        node_id: identity.node_id.clone(),
        node_name: identity.node_name.clone(),
        hubs: hubs.clone(),
        system_port: derived.system_port,
        terminal_port: derived.terminal_port,
        https_port: derived.https_port,
        installed_at: Utc::now(),
    })?;

    for name in &report.installed {
        println!("✅ {}", name);
    }
    for (name, error) in &report.failed {
        println!("❌ {}: {}", name, error);
    }
    if report.installed.is_empty() && !report.failed.is_empty() {
        bail!("no tunnel service could be registered");
    }

    let public_key = supervisor.public_key()?;
    let entry = HubAuthorizationEntry {
        node_id: identity.node_id.clone(),
        public_key,
    };
    println!("\nRegister this node on each hub before the tunnels can connect:\n");
    for hub in &hubs {
        println!("{}", ManualGate::instructions(hub, &entry));
    }
    println!("Tunnel liveness is asynchronous; check with: orizon status");

    Ok(())
}

fn handle_uninstall(purge: bool) -> Result<()> {
    require_elevation()?;

    let store = AgentStore::new(paths::agent_config_path()?);
    if let Ok(record) = store.load() {
        println!(
            "Uninstalling node {} ({}), {} hub(s)",
            record.node_id,
            record.node_name,
            record.hubs.len()
        );
    }

    let manager = native_manager()?;
    let provisioner = AgentProvisioner::new(manager.as_ref(), paths::log_dir()?);
    let removed = provisioner.deprovision()?;

    if removed.is_empty() {
        println!("No tunnel services installed");
    }
    for name in &removed {
        println!("✅ removed {}", name);
    }

    if purge {
        let config_dir = paths::config_dir()?;
        if config_dir.exists() {
            fs::remove_dir_all(&config_dir)
                .with_context(|| format!("failed to purge {:?}", config_dir))?;
            println!("✅ purged {}", config_dir.display());
        }
        let log_dir = paths::log_dir()?;
        if log_dir.exists() {
            fs::remove_dir_all(&log_dir)
                .with_context(|| format!("failed to purge {:?}", log_dir))?;
            println!("✅ purged {}", log_dir.display());
        }
    } else {
        println!("Configuration and keys kept for reinstall (use --purge to delete)");
    }

    Ok(())
}

fn handle_status() -> Result<()> {
    let manager = native_manager()?;
    let provisioner = AgentProvisioner::new(manager.as_ref(), paths::log_dir()?);
    let statuses = provisioner.status()?;

    if statuses.is_empty() {
        println!("No tunnel services installed");
        return Ok(());
    }
    for (name, status) in statuses {
        println!("{:<40} {:?}", name, status);
    }
    Ok(())
}

fn handle_topology(
    node_id: Option<String>,
    hub_list: Option<String>,
    app_port_args: Vec<String>,
    json: bool,
) -> Result<()> {
    let app_ports = parse_app_ports(&app_port_args)?;

    // Explicit inputs win; otherwise rebuild from the installed
    // configuration with the same deterministic builder. The cache is
    // never trusted for port values, only for the original inputs.
    let (identity, hubs) = match (node_id, hub_list) {
        (Some(node_id), Some(hub_list)) => {
            (NodeIdentity::new(node_id, "")?, parse_hub_list(&hub_list)?)
        }
        (None, None) => {
            let record = AgentStore::new(paths::agent_config_path()?)
                .load()
                .context("no installed configuration; pass --node-id and --hubs")?;
            (
                NodeIdentity::new(record.node_id, record.node_name)?,
                record.hubs,
            )
        }
        _ => bail!("--node-id and --hubs must be given together"),
    };

    let topology = build(&identity, &hubs, &app_ports)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&topology)?);
    } else {
        print!("{}", topology);
    }
    Ok(())
}

fn handle_key_show() -> Result<()> {
    let store = AgentStore::new(paths::agent_config_path()?);
    let record = store
        .load()
        .context("no installed configuration; run install first")?;

    let supervisor = KeySupervisor::new(paths::key_dir()?, &record.node_id);
    let public_key = supervisor.public_key()?;
    println!("{}\n", public_key);

    let entry = HubAuthorizationEntry {
        node_id: record.node_id,
        public_key,
    };
    for hub in &record.hubs {
        println!("{}", ManualGate::instructions(hub, &entry));
    }
    Ok(())
}

fn handle_key_rotate() -> Result<()> {
    let store = AgentStore::new(paths::agent_config_path()?);
    let record = store
        .load()
        .context("no installed configuration; run install first")?;

    let supervisor = KeySupervisor::new(paths::key_dir()?, &record.node_id);
    let pair = supervisor
        .install()
        .context("unrecoverable key generation failure")?;

    println!("✅ new key generated: {}", pair.public_key_path.display());
    println!("{}\n", supervisor.public_key()?);
    warn!("previous key backed up; hubs still authorize the OLD key until re-registered");
    println!("Re-register the new key on every hub, then restart the tunnels.");
    Ok(())
}

fn handle_script(
    platform: String,
    node_id: String,
    hub_list: String,
    name: String,
    app_port_args: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let platform = ScriptPlatform::parse(&platform)
        .with_context(|| format!("unknown script platform '{}'", platform))?;
    let identity = NodeIdentity::new(node_id, name)?;
    let hubs = parse_hub_list(&hub_list)?;
    let app_ports = parse_app_ports(&app_port_args)?;

    let script = orizon_emit::render(platform, &identity, &hubs, &app_ports)?;

    match output {
        Some(path) => {
            fs::write(&path, script)
                .with_context(|| format!("failed to write script to {:?}", path))?;
            println!("✅ script written to {}", path.display());
        }
        None => print!("{}", script),
    }
    Ok(())
}

/// Parse repeated `role=local[:remote]` arguments
fn parse_app_ports(args: &[String]) -> Result<AppPorts> {
    let mut ports = AppPorts::new();
    for arg in args {
        let (role, value) = arg
            .split_once('=')
            .with_context(|| format!("invalid app port '{}': expected role=local[:remote]", arg))?;
        let (local, remote) = match value.split_once(':') {
            Some((local, remote)) => (
                local.parse::<u16>().ok(),
                Some(remote.parse::<u16>().with_context(|| {
                    format!("invalid remote port in '{}'", arg)
                })?),
            ),
            None => (value.parse::<u16>().ok(), None),
        };
        let local =
            local.with_context(|| format!("invalid local port in '{}'", arg))?;
        ports.insert(
            role,
            PortOverride {
                local_port: local,
                remote_port: remote,
            },
        )?;
    }
    Ok(ports)
}

/// System-level service registration needs root on Unix; surface it as a
/// clean configuration error instead of a pile of permission failures.
fn require_elevation() -> Result<()> {
    if !paths::is_elevated() {
        bail!("this command must run with elevated privileges (try sudo)");
    }
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_ports() {
        let ports =
            parse_app_ports(&["registry=5000".to_string(), "https=8443:45001".to_string()])
                .unwrap();
        assert_eq!(
            ports.get("registry"),
            Some(&PortOverride {
                local_port: 5000,
                remote_port: None
            })
        );
        assert_eq!(
            ports.get("https"),
            Some(&PortOverride {
                local_port: 8443,
                remote_port: Some(45001)
            })
        );
    }

    #[test]
    fn test_parse_app_ports_rejects_garbage() {
        assert!(parse_app_ports(&["registry".to_string()]).is_err());
        assert!(parse_app_ports(&["registry=abc".to_string()]).is_err());
        assert!(parse_app_ports(&["registry=5000:xyz".to_string()]).is_err());
        assert!(parse_app_ports(&["registry=0".to_string()]).is_err());
        assert!(
            parse_app_ports(&["a=1".to_string(), "a=2".to_string()]).is_err(),
            "duplicate roles must be rejected"
        );
    }

    #[test]
    fn test_cli_parses_install() {
        let cli = Cli::try_parse_from([
            "orizon",
            "install",
            "--node-id",
            "11111111-1111-1111-1111-111111111111",
            "--hubs",
            "hub1.example.com:2222,hub2.example.com:2222",
            "--app-port",
            "registry=5000",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                node_id,
                hubs,
                app_ports,
                ..
            } => {
                assert_eq!(node_id, "11111111-1111-1111-1111-111111111111");
                assert_eq!(hubs, "hub1.example.com:2222,hub2.example.com:2222");
                assert_eq!(app_ports, vec!["registry=5000"]);
            }
            other => panic!("parsed wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_script_output() {
        let cli = Cli::try_parse_from([
            "orizon",
            "script",
            "--platform",
            "powershell",
            "--node-id",
            "11111111-1111-1111-1111-111111111111",
            "--hubs",
            "hub1.example.com",
            "-o",
            "install.ps1",
        ])
        .unwrap();
        match cli.command {
            Commands::Script {
                platform, output, ..
            } => {
                assert_eq!(platform, "powershell");
                assert_eq!(output, Some(PathBuf::from("install.ps1")));
            }
            other => panic!("parsed wrong command: {:?}", other),
        }
    }
}
