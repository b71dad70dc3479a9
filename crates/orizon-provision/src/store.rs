//! Persisted agent configuration
//!
//! A JSON snapshot of what was installed: node identity, hub list, and the
//! three canonical ports. This is a derived cache, never the authority —
//! the topology is always recomputable from the identity and hub list, and
//! uninstall falls back to exactly that recomputation when the file is
//! missing. It exists so uninstall and upgrade do not depend on the
//! operator re-typing the original inputs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use orizon_topology::HubServer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What install wrote, for recovery on uninstall/upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub node_id: String,
    pub node_name: String,
    pub hubs: Vec<HubServer>,
    pub system_port: u16,
    pub terminal_port: u16,
    pub https_port: u16,
    pub installed_at: DateTime<Utc>,
}

/// Reads and writes the agent config cache at a well-known path
pub struct AgentStore {
    path: PathBuf,
}

impl AgentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, record: &AgentRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let json =
            serde_json::to_string_pretty(record).context("failed to serialize agent config")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write agent config {:?}", self.path))?;
        Ok(())
    }

    pub fn load(&self) -> Result<AgentRecord> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read agent config {:?}", self.path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("failed to parse agent config {:?}", self.path))
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove agent config {:?}", self.path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> AgentRecord {
        AgentRecord {
            node_id: "11111111-1111-1111-1111-111111111111".to_string(),
            node_name: "edge-1".to_string(),
            hubs: vec![HubServer {
                name: "hub1".to_string(),
                host: "hub1.example.com".to_string(),
                ssh_port: 2222,
                is_primary: true,
            }],
            system_port: 9123,
            terminal_port: 20123,
            https_port: 20124,
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = AgentStore::new(temp.path().join("agent.json"));

        let record = record();
        store.save(&record).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), record);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let store = AgentStore::new(temp.path().join("nested/deeper/agent.json"));
        store.save(&record()).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = AgentStore::new(temp.path().join("agent.json"));
        store.remove().unwrap();
        store.save(&record()).unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }
}
