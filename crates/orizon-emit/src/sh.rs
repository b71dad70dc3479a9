//! POSIX shell installer
//!
//! One script covers Linux (systemd) and macOS (launchd), dispatching on
//! `uname` at run time. The service parameters — restart delay, keepalive
//! probing, exit-on-forward-failure — are the same constants the native
//! provisioner uses, pulled from `orizon-provision` so the two cannot
//! drift apart silently.

use orizon_provision::{KEEPALIVE_INTERVAL_SECS, KEEPALIVE_MAX_MISSES, RESTART_DELAY_SECS};
use orizon_topology::{DerivedPorts, NodeIdentity, TunnelTopology};

use crate::summary_comment;

pub(crate) fn render(
    identity: &NodeIdentity,
    topology: &TunnelTopology,
    derived: DerivedPorts,
) -> String {
    let mut install_calls = String::new();
    for (hub, binding) in topology.iter_bindings() {
        install_calls.push_str(&format!(
            "install_tunnel '{name}' '{host}' {ssh_port} {remote} {local}\n",
            name = binding.service_name(hub),
            host = hub.host,
            ssh_port = hub.ssh_port,
            remote = binding.remote_port,
            local = binding.local_port,
        ));
    }

    format!(
        r#"#!/bin/sh
# Orizon tunnel installer (generated)
#
# Verify this topology before running; these are the exact ports the node
# will claim on each hub:
#
{summary}
#
# Requires: root, openssh client, systemd (Linux) or launchd (macOS).
set -eu

NODE_ID='{node_id}'
NODE_NAME='{node_name}'
KEY_DIR=/etc/orizon/keys
KEY="$KEY_DIR/id_ed25519"
LOG_DIR=/var/log/orizon
RESTART_DELAY={restart_delay}

[ "$(id -u)" -eq 0 ] || {{ echo "error: must run as root" >&2; exit 1; }}

case "$NODE_ID" in
    *[!A-Za-z0-9-]*|'') echo "error: malformed node id '$NODE_ID'" >&2; exit 1 ;;
esac

# --- port derivation -------------------------------------------------------
# Same formula as every other Orizon implementation: SHA-256 of the node id,
# first 4 bytes as a big-endian integer.
sha256_hex8() {{
    if command -v sha256sum >/dev/null 2>&1; then
        printf '%s' "$1" | sha256sum | cut -c1-8
    else
        printf '%s' "$1" | shasum -a 256 | cut -c1-8
    fi
}}

HASH32=$((0x$(sha256_hex8 "$NODE_ID")))
SYSTEM_PORT=$((9000 + HASH32 % 1000))
TERMINAL_PORT=$((10000 + HASH32 % 50000))
HTTPS_PORT=$((TERMINAL_PORT + 1))

# Drift guard: the values derived here must equal the values this script
# was generated with. A mismatch means the node id was edited or the
# formula has diverged; installing would claim the wrong hub ports.
[ "$SYSTEM_PORT" -eq {system_port} ] || {{ echo "error: port derivation drift (system: $SYSTEM_PORT != {system_port})" >&2; exit 1; }}
[ "$TERMINAL_PORT" -eq {terminal_port} ] || {{ echo "error: port derivation drift (terminal: $TERMINAL_PORT != {terminal_port})" >&2; exit 1; }}
[ "$HTTPS_PORT" -eq {https_port} ] || {{ echo "error: port derivation drift (https: $HTTPS_PORT != {https_port})" >&2; exit 1; }}

# --- key material ----------------------------------------------------------
mkdir -p "$KEY_DIR"
chmod 700 "$KEY_DIR"
if [ -f "$KEY" ]; then
    STAMP=$(date -u +%Y%m%d%H%M%S)
    echo "existing key preserved as $KEY.bak-$STAMP"
    mv "$KEY" "$KEY.bak-$STAMP"
    [ -f "$KEY.pub" ] && mv "$KEY.pub" "$KEY.bak-$STAMP.pub"
fi
ssh-keygen -q -t ed25519 -N '' -C "orizon-$NODE_ID" -f "$KEY"
chmod 600 "$KEY"

mkdir -p "$LOG_DIR"

# --- services --------------------------------------------------------------
OS=$(uname -s)

ssh_args() {{
    # $1 host, $2 ssh port, $3 remote port, $4 local port
    printf '%s' "-i $KEY -N -p $2 -R $3:localhost:$4 -o BatchMode=yes -o ExitOnForwardFailure=yes -o ServerAliveInterval={keepalive_interval} -o ServerAliveCountMax={keepalive_misses} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null $NODE_ID@$1"
}}

install_tunnel_systemd() {{
    name=$1; host=$2; ssh_port=$3; remote=$4; local_port=$5
    systemctl stop "$name" >/dev/null 2>&1 || true
    systemctl disable "$name" >/dev/null 2>&1 || true
    cat > "/etc/systemd/system/$name.service" <<UNIT
[Unit]
Description=Orizon reverse tunnel $name
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart=/usr/bin/ssh $(ssh_args "$host" "$ssh_port" "$remote" "$local_port")
Restart=always
RestartSec=$RESTART_DELAY
StandardOutput=append:$LOG_DIR/$name.log
StandardError=append:$LOG_DIR/$name.log

[Install]
WantedBy=multi-user.target
UNIT
    systemctl daemon-reload
    systemctl enable "$name" >/dev/null
    systemctl start "$name"
    echo "installed $name ($host:$remote <- localhost:$local_port)"
}}

install_tunnel_launchd() {{
    name=$1; host=$2; ssh_port=$3; remote=$4; local_port=$5
    plist="/Library/LaunchDaemons/$name.plist"
    launchctl bootout "system/$name" >/dev/null 2>&1 || true
    args_xml=''
    for arg in $(ssh_args "$host" "$ssh_port" "$remote" "$local_port"); do
        args_xml="$args_xml        <string>$arg</string>
"
    done
    cat > "$plist" <<PLIST
<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>$name</string>
    <key>ProgramArguments</key>
    <array>
        <string>/usr/bin/ssh</string>
$args_xml    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>ThrottleInterval</key>
    <integer>$RESTART_DELAY</integer>
    <key>StandardOutPath</key>
    <string>$LOG_DIR/$name.log</string>
    <key>StandardErrorPath</key>
    <string>$LOG_DIR/$name.log</string>
</dict>
</plist>
PLIST
    launchctl bootstrap system "$plist" || launchctl load -w "$plist"
    echo "installed $name ($host:$remote <- localhost:$local_port)"
}}

install_tunnel() {{
    case "$OS" in
        Linux)  install_tunnel_systemd "$@" ;;
        Darwin) install_tunnel_launchd "$@" ;;
        *) echo "error: unsupported platform $OS" >&2; exit 1 ;;
    esac
}}

{install_calls}
# --- hub registration ------------------------------------------------------
echo
echo "Node public key (register on each hub before tunnels can connect):"
cat "$KEY.pub"
echo
echo "On each hub, as root:"
echo "  useradd --create-home --shell /usr/sbin/nologin $NODE_ID"
echo "  install -d -m 700 -o $NODE_ID -g $NODE_ID /home/$NODE_ID/.ssh"
echo "  echo 'restrict,port-forwarding '\"$(cat "$KEY.pub")\" > /home/$NODE_ID/.ssh/authorized_keys"
echo "  chown $NODE_ID:$NODE_ID /home/$NODE_ID/.ssh/authorized_keys && chmod 600 /home/$NODE_ID/.ssh/authorized_keys"
"#,
        summary = summary_comment(topology, "#   "),
        node_id = identity.node_id,
        node_name = identity.node_name,
        restart_delay = RESTART_DELAY_SECS,
        keepalive_interval = KEEPALIVE_INTERVAL_SECS,
        keepalive_misses = KEEPALIVE_MAX_MISSES,
        system_port = derived.system_port,
        terminal_port = derived.terminal_port,
        https_port = derived.https_port,
        install_calls = install_calls,
    )
}
