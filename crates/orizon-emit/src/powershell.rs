//! PowerShell installer (Windows)
//!
//! Windows nodes get tunnels as SCM services created through `sc.exe`, the
//! same commands the native Windows adapter issues, with the same restart
//! and keepalive parameters. Requires the Windows OpenSSH client (ships
//! with Windows 10+) for both `ssh.exe` and `ssh-keygen.exe`.

use orizon_provision::{KEEPALIVE_INTERVAL_SECS, KEEPALIVE_MAX_MISSES, RESTART_DELAY_SECS};
use orizon_topology::{DerivedPorts, NodeIdentity, TunnelTopology};

use crate::summary_comment;

pub(crate) fn render(
    identity: &NodeIdentity,
    topology: &TunnelTopology,
    derived: DerivedPorts,
) -> String {
    let restart_ms = RESTART_DELAY_SECS * 1000;
    let mut service_blocks = String::new();
    for (hub, binding) in topology.iter_bindings() {
        let name = binding.windows_service_name(hub);
        service_blocks.push_str(&format!(
            r#"Install-Tunnel -Name '{name}' -HubHost '{host}' -SshPort {ssh_port} -RemotePort {remote} -LocalPort {local}
"#,
            name = name,
            host = hub.host,
            ssh_port = hub.ssh_port,
            remote = binding.remote_port,
            local = binding.local_port,
        ));
    }

    format!(
        r#"# Orizon tunnel installer (generated)
#
# Verify this topology before running; these are the exact ports the node
# will claim on each hub:
#
{summary}
#
# Requires: elevated PowerShell, Windows OpenSSH client.
$ErrorActionPreference = 'Stop'

$NodeId = '{node_id}'
$NodeName = '{node_name}'
$ConfigDir = Join-Path $env:ProgramData 'Orizon'
$KeyDir = Join-Path $ConfigDir 'keys'
$Key = Join-Path $KeyDir 'id_ed25519'
$LogDir = Join-Path $ConfigDir 'logs'

$principal = New-Object Security.Principal.WindowsPrincipal([Security.Principal.WindowsIdentity]::GetCurrent())
if (-not $principal.IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)) {{
    Write-Error 'must run from an elevated PowerShell'
    exit 1
}}
if ($NodeId -notmatch '^[A-Za-z0-9-]+$') {{
    Write-Error "malformed node id '$NodeId'"
    exit 1
}}

# --- port derivation -------------------------------------------------------
# Same formula as every other Orizon implementation: SHA-256 of the node id,
# first 4 bytes as a big-endian integer.
$sha = [System.Security.Cryptography.SHA256]::Create()
$digest = $sha.ComputeHash([System.Text.Encoding]::UTF8.GetBytes($NodeId))
$hash32 = ([uint64]$digest[0] * 16777216) + ([uint64]$digest[1] * 65536) + ([uint64]$digest[2] * 256) + [uint64]$digest[3]
$SystemPort = 9000 + ($hash32 % 1000)
$TerminalPort = 10000 + ($hash32 % 50000)
$HttpsPort = $TerminalPort + 1

# Drift guard: a mismatch means the node id was edited or the formula has
# diverged; installing would claim the wrong hub ports.
if ($SystemPort -ne {system_port}) {{ Write-Error "port derivation drift (system: $SystemPort != {system_port})"; exit 1 }}
if ($TerminalPort -ne {terminal_port}) {{ Write-Error "port derivation drift (terminal: $TerminalPort != {terminal_port})"; exit 1 }}
if ($HttpsPort -ne {https_port}) {{ Write-Error "port derivation drift (https: $HttpsPort != {https_port})"; exit 1 }}

# --- key material ----------------------------------------------------------
New-Item -ItemType Directory -Force -Path $KeyDir | Out-Null
New-Item -ItemType Directory -Force -Path $LogDir | Out-Null
if (Test-Path $Key) {{
    $stamp = (Get-Date).ToUniversalTime().ToString('yyyyMMddHHmmss')
    Write-Host "existing key preserved as $Key.bak-$stamp"
    Move-Item $Key "$Key.bak-$stamp"
    if (Test-Path "$Key.pub") {{ Move-Item "$Key.pub" "$Key.bak-$stamp.pub" }}
}}
ssh-keygen -q -t ed25519 -N '""' -C "orizon-$NodeId" -f $Key
if ($LASTEXITCODE -ne 0) {{ Write-Error 'ssh-keygen failed'; exit 1 }}

# --- services --------------------------------------------------------------
function Install-Tunnel {{
    param($Name, $HubHost, $SshPort, $RemotePort, $LocalPort)

    sc.exe stop $Name | Out-Null
    sc.exe delete $Name | Out-Null

    $logPath = Join-Path $LogDir "$Name.log"
    $sshArgs = "-i `"$Key`" -N -p $SshPort -R ${{RemotePort}}:localhost:$LocalPort " +
        "-o BatchMode=yes -o ExitOnForwardFailure=yes " +
        "-o ServerAliveInterval={keepalive_interval} -o ServerAliveCountMax={keepalive_misses} " +
        "-o StrictHostKeyChecking=no -o UserKnownHostsFile=NUL " +
        "-E `"$logPath`" $NodeId@$HubHost"
    $binPath = "ssh.exe $sshArgs"

    sc.exe create $Name binPath= "$binPath" start= auto DisplayName= "Orizon reverse tunnel to $HubHost" | Out-Null
    if ($LASTEXITCODE -ne 0) {{ Write-Warning "failed to create $Name"; return }}
    sc.exe failure $Name reset= 0 actions= restart/{restart_ms}/restart/{restart_ms}/restart/{restart_ms} | Out-Null
    sc.exe start $Name | Out-Null
    Write-Host "installed $Name ($HubHost`:$RemotePort <- localhost:$LocalPort)"
}}

{service_blocks}
# --- hub registration ------------------------------------------------------
Write-Host ''
Write-Host 'Node public key (register on each hub before tunnels can connect):'
Get-Content "$Key.pub"
"#,
        summary = summary_comment(topology, "#   "),
        node_id = identity.node_id,
        node_name = identity.node_name,
        system_port = derived.system_port,
        terminal_port = derived.terminal_port,
        https_port = derived.https_port,
        keepalive_interval = KEEPALIVE_INTERVAL_SECS,
        keepalive_misses = KEEPALIVE_MAX_MISSES,
        restart_ms = restart_ms,
        service_blocks = service_blocks,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orizon_topology::{build, parse_hub_list, AppPorts};

    const NODE_ID: &str = "11111111-1111-1111-1111-111111111111";

    fn script() -> String {
        let identity = NodeIdentity::new(NODE_ID, "edge-1").unwrap();
        let hubs = parse_hub_list("hub1.example.com:2222,hub2.example.com:2222").unwrap();
        let topology = build(&identity, &hubs, &AppPorts::new()).unwrap();
        let derived = orizon_topology::PortAllocator::derive(NODE_ID).unwrap();
        render(&identity, &topology, derived)
    }

    #[test]
    fn test_script_uses_windows_service_names() {
        let script = script();
        for name in [
            "OrizonTunnelHub1System",
            "OrizonTunnelHub1Terminal",
            "OrizonTunnelHub1Https",
            "OrizonTunnelHub2System",
            "OrizonTunnelHub2Terminal",
            "OrizonTunnelHub2Https",
        ] {
            assert!(script.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_script_configures_scm_restart() {
        let script = script();
        assert!(script.contains("start= auto"));
        assert!(script.contains("reset= 0"));
        assert!(script.contains("actions= restart/10000/restart/10000/restart/10000"));
    }

    #[test]
    fn test_script_backs_up_existing_key() {
        let script = script();
        assert!(script.contains(r#"Move-Item $Key "$Key.bak-$stamp""#));
        assert!(!script.contains("Remove-Item $Key"));
    }

    #[test]
    fn test_script_uses_shared_formula_constants() {
        let script = script();
        assert!(script.contains("$SystemPort = 9000 + ($hash32 % 1000)"));
        assert!(script.contains("$TerminalPort = 10000 + ($hash32 % 50000)"));
        assert!(script.contains("$HttpsPort = $TerminalPort + 1"));
    }
}
