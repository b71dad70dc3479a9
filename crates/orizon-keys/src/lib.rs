//! Node key lifecycle
//!
//! Guarantees exactly one active Ed25519 key pair per node installation.
//! Generation shells out to `ssh-keygen` with an empty passphrase — the
//! tunnels themselves are plain `ssh` processes started unattended by the
//! service manager, so there is nobody to type one. Protection of the
//! private key rests on filesystem permissions and the per-node restricted
//! hub accounts.
//!
//! An existing key is never overwritten or deleted: it may still be
//! authorized on one or more hubs, and losing it silently would strand
//! those authorizations. Rotation renames both halves to a timestamped
//! backup before generating the replacement.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::{info, warn};

/// Private key filename inside the key directory
pub const PRIVATE_KEY_FILE: &str = "id_ed25519";

/// Errors from key lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to create key directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to back up existing key {path}: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to run ssh-keygen (is openssh installed?): {0}")]
    KeygenSpawn(std::io::Error),

    #[error("ssh-keygen failed: {stderr}")]
    KeygenFailed { stderr: String },

    #[error("failed to read public key {path}: {source}")]
    ReadPublicKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to set key permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The node's active key pair on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKeyPair {
    /// Always "ed25519"
    pub algorithm: &'static str,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    /// Key comment, `orizon-<node_id>`
    pub comment: String,
}

/// Paths an existing key pair was moved to during rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBackup {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

/// Manages the single active key pair for one node installation
pub struct KeySupervisor {
    key_dir: PathBuf,
    node_id: String,
}

impl KeySupervisor {
    pub fn new(key_dir: impl Into<PathBuf>, node_id: impl Into<String>) -> Self {
        Self {
            key_dir: key_dir.into(),
            node_id: node_id.into(),
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.key_dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.pub", PRIVATE_KEY_FILE))
    }

    fn comment(&self) -> String {
        format!("orizon-{}", self.node_id)
    }

    /// Whether an active private key exists
    pub fn key_exists(&self) -> bool {
        self.private_key_path().exists()
    }

    /// Idempotent entry point: keep an existing key pair untouched and
    /// generate one only when missing. For callers that must not invalidate
    /// hub authorizations referencing the current key.
    pub fn ensure(&self) -> Result<NodeKeyPair, KeyError> {
        if self.key_exists() {
            return Ok(self.current());
        }
        self.generate()
    }

    /// Install-time entry point: generate a fresh key pair, preserving any
    /// existing pair under a timestamped backup name first. The old public
    /// key may still be authorized on one or more hubs; renaming instead of
    /// overwriting is what lets an operator roll back a half-finished
    /// install or recover a stranded authorization. There is no automatic
    /// rotation — reaching this code is always an explicit administrative
    /// action.
    pub fn install(&self) -> Result<NodeKeyPair, KeyError> {
        if let Some(backup) = self.backup_existing()? {
            info!(
                old = %backup.private_key_path.display(),
                "existing key preserved before regeneration"
            );
        }
        self.generate()
    }

    /// Move an existing key pair to `id_ed25519.bak-<timestamp>{,.pub}`.
    ///
    /// Returns `None` when there is nothing to back up. Never deletes.
    pub fn backup_existing(&self) -> Result<Option<KeyBackup>, KeyError> {
        let private = self.private_key_path();
        if !private.exists() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut backup_private = self
            .key_dir
            .join(format!("{}.bak-{}", PRIVATE_KEY_FILE, stamp));
        // Same-second re-rotation must not clobber an earlier backup.
        let mut serial = 1u32;
        while backup_private.exists() {
            backup_private = self
                .key_dir
                .join(format!("{}.bak-{}-{}", PRIVATE_KEY_FILE, stamp, serial));
            serial += 1;
        }
        let backup_public = PathBuf::from(format!("{}.pub", backup_private.display()));

        fs::rename(&private, &backup_private).map_err(|source| KeyError::Backup {
            path: private.clone(),
            source,
        })?;

        let public = self.public_key_path();
        if public.exists() {
            fs::rename(&public, &backup_public).map_err(|source| KeyError::Backup {
                path: public.clone(),
                source,
            })?;
        } else {
            warn!(path = %public.display(), "private key had no public counterpart to back up");
        }

        Ok(Some(KeyBackup {
            private_key_path: backup_private,
            public_key_path: backup_public,
        }))
    }

    /// Read the current public key text for hub registration
    pub fn public_key(&self) -> Result<String, KeyError> {
        let path = self.public_key_path();
        let key = fs::read_to_string(&path)
            .map_err(|source| KeyError::ReadPublicKey { path, source })?;
        Ok(key.trim().to_string())
    }

    /// Describe the key pair currently on disk
    fn current(&self) -> NodeKeyPair {
        NodeKeyPair {
            algorithm: "ed25519",
            private_key_path: self.private_key_path(),
            public_key_path: self.public_key_path(),
            comment: self.comment(),
        }
    }

    fn generate(&self) -> Result<NodeKeyPair, KeyError> {
        fs::create_dir_all(&self.key_dir).map_err(|source| KeyError::CreateDir {
            path: self.key_dir.clone(),
            source,
        })?;
        self.restrict_dir_permissions()?;

        let private = self.private_key_path();
        let output = Command::new("ssh-keygen")
            .arg("-q")
            .arg("-t")
            .arg("ed25519")
            .arg("-N")
            .arg("")
            .arg("-C")
            .arg(self.comment())
            .arg("-f")
            .arg(&private)
            .output()
            .map_err(KeyError::KeygenSpawn)?;

        if !output.status.success() {
            return Err(KeyError::KeygenFailed {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.restrict_key_permissions(&private)?;
        info!(path = %private.display(), "generated new ed25519 node key");

        Ok(self.current())
    }

    #[cfg(unix)]
    fn restrict_dir_permissions(&self) -> Result<(), KeyError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&self.key_dir, fs::Permissions::from_mode(0o700)).map_err(
            |source| KeyError::Permissions {
                path: self.key_dir.clone(),
                source,
            },
        )
    }

    #[cfg(not(unix))]
    fn restrict_dir_permissions(&self) -> Result<(), KeyError> {
        Ok(())
    }

    /// Only the service-execution principal may read the private key.
    #[cfg(unix)]
    fn restrict_key_permissions(&self, path: &Path) -> Result<(), KeyError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            KeyError::Permissions {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[cfg(not(unix))]
    fn restrict_key_permissions(&self, _path: &Path) -> Result<(), KeyError> {
        Ok(())
    }
}
