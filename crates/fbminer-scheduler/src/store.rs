//! File-based client state, a single pretty JSON file.
//! Every mutation goes through [`ClientStore::update`], which writes the
//! file before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fbminer_core::config::StoreConfig;
use fbminer_core::error::{MinerError, Result};
use fbminer_core::types::{CustomerGroup, GroupMessage};
use serde::{Deserialize, Serialize};

use crate::quota::QuotaRecord;
use crate::schedule::ScheduleDraft;

/// Navigation context passed from the group list to the schedule editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub page_id: Option<String>,
    pub selected_groups: Vec<i64>,
    pub editing_schedule_id: Option<i64>,
    #[serde(default)]
    pub editing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub selected_page: Option<String>,
    /// Groups kept locally per page.
    #[serde(default)]
    pub groups: HashMap<String, Vec<CustomerGroup>>,
    /// Message sequences keyed by `page:group`.
    #[serde(default)]
    pub group_messages: HashMap<String, Vec<GroupMessage>>,
    #[serde(default)]
    pub schedule_drafts: HashMap<String, Vec<ScheduleDraft>>,
    #[serde(default)]
    pub handoff: Option<Handoff>,
    #[serde(default)]
    pub quota: QuotaRecord,
}

impl ClientState {
    pub fn group_messages_key(page_id: &str, group_id: i64) -> String {
        format!("{page_id}:{group_id}")
    }

    pub fn group_messages(&self, page_id: &str, group_id: i64) -> &[GroupMessage] {
        self.group_messages
            .get(&Self::group_messages_key(page_id, group_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub struct ClientStore {
    path: PathBuf,
    state: ClientState,
}

impl ClientStore {
    /// Open the store at `path`, starting empty when the file is missing
    /// or unreadable.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                    tracing::warn!("⚠️ Failed to parse {}: {e}", path.display());
                    ClientState::default()
                }),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to read {}: {e}", path.display());
                    ClientState::default()
                }
            }
        } else {
            ClientState::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Open the store configured in `[store]` (`~` is expanded).
    pub fn open_configured(config: &StoreConfig) -> Result<Self> {
        let expanded = shellexpand::tilde(&config.path);
        Self::open(Path::new(expanded.as_ref()))
    }

    /// Default store path (~/.fbminer/state.json).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".fbminer").join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Apply a mutation and persist it.
    pub fn update<R>(&mut self, mutate: impl FnOnce(&mut ClientState) -> R) -> Result<R> {
        let out = mutate(&mut self.state);
        self.save()?;
        Ok(out)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, json)
            .map_err(|e| MinerError::Store(format!("Write {} failed: {e}", self.path.display())))?;
        tracing::debug!("💾 Saved client state to {}", self.path.display());
        Ok(())
    }

    /// Read and clear the navigation handoff; a second call returns `None`.
    pub fn take_handoff(&mut self) -> Result<Option<Handoff>> {
        if self.state.handoff.is_none() {
            return Ok(None);
        }
        self.update(|s| s.handoff.take())
    }
}
