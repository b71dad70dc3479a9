//! Hub access boundary
//!
//! The hub side of the system — one restricted account per node, holding
//! exactly that node's current public key, with login disabled beyond port
//! forwarding — is an external collaborator. This crate carries only the
//! contract the agent depends on: once a public key is registered under a
//! node's account, that node's forwarding requests are accepted.
//!
//! The hub performs no validation of a requested remote port beyond
//! authentication. If two nodes derive the same remote port on the same hub,
//! nothing at this boundary detects or rejects it: the second `-R` request
//! fails at connect time and the losing tunnel retries forever. That gap is
//! part of the zero-coordination design, not an oversight.

use orizon_topology::HubServer;
use tracing::info;

/// Registration failure at the hub boundary
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("registration with hub '{hub}' failed: {reason}")]
    Registration { hub: String, reason: String },
}

/// What a hub stores per node: the account name and its single authorized key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubAuthorizationEntry {
    /// Node id; doubles as the restricted account name on the hub
    pub node_id: String,
    /// Current public key text (one authorized_keys line, without options)
    pub public_key: String,
}

impl HubAuthorizationEntry {
    /// The authorized_keys line for this node's restricted account.
    ///
    /// `restrict` clears every permission, `port-forwarding` adds back the
    /// only one a tunnel account needs.
    pub fn authorized_keys_line(&self) -> String {
        format!("restrict,port-forwarding {}", self.public_key)
    }
}

/// Per-hub key registration
pub trait HubAccessGate {
    /// Make `entry.public_key` the authorized key for `entry.node_id`'s
    /// account on `hub`.
    fn register(&self, hub: &HubServer, entry: &HubAuthorizationEntry) -> Result<(), GateError>;
}

/// Out-of-band registration: renders the commands an operator runs on the
/// hub by hand. This is the only adapter the agent ships; automated
/// registration belongs to hub-side tooling.
#[derive(Debug, Default)]
pub struct ManualGate;

impl ManualGate {
    /// Shell snippet that creates the restricted account (idempotently) and
    /// installs the node's key on one hub.
    pub fn instructions(hub: &HubServer, entry: &HubAuthorizationEntry) -> String {
        format!(
            r#"# Run on {host} (hub '{name}') as root:
id -u {node_id} >/dev/null 2>&1 || useradd --create-home --shell /usr/sbin/nologin {node_id}
install -d -m 700 -o {node_id} -g {node_id} /home/{node_id}/.ssh
cat > /home/{node_id}/.ssh/authorized_keys <<'EOF'
{line}
EOF
chown {node_id}:{node_id} /home/{node_id}/.ssh/authorized_keys
chmod 600 /home/{node_id}/.ssh/authorized_keys
"#,
            host = hub.host,
            name = hub.name,
            node_id = entry.node_id,
            line = entry.authorized_keys_line(),
        )
    }
}

impl HubAccessGate for ManualGate {
    fn register(&self, hub: &HubServer, entry: &HubAuthorizationEntry) -> Result<(), GateError> {
        // Nothing to do remotely; surface the instructions and trust the
        // operator to apply them before the tunnels first connect.
        info!(hub = %hub.name, node_id = %entry.node_id, "manual key registration required");
        println!("{}", Self::instructions(hub, entry));
        Ok(())
    }
}
