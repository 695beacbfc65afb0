//! The raft state machine: a session table and a key-value store
//! namespaced per plugin, mutated by committed commands.

use std::sync::RwLock;

use serde_json::Value;

use crate::raft::snapshot::Snapshot;
use crate::sync::commands::{Command, SessionDict, StorageAction, StorageDict, StorageState};

/// Replicated state shared by every node.
///
/// Application is idempotent: a `Session` command replaces the session
/// wholesale and every storage action overwrites rather than accumulates,
/// so re-applying an already-applied entry is a no-op relative to state.
#[derive(Default)]
pub struct StateApplier {
    sessions: RwLock<SessionDict>,
    storage: RwLock<StorageState>,
}

impl StateApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed command on a follower.
    ///
    /// Followers learn about mutations only through the log, so the
    /// command is applied directly to local state.
    pub fn apply_as_follower(&self, command: &Command) {
        tracing::debug!(?command, "apply to follower");
        match command {
            Command::Session(data) => {
                self.set_session(&data.sid, data.session.clone());
            }
            Command::Storage(action) => self.apply_storage_action(action),
            Command::Snapshot(snapshot) => self.restore_from_snapshot(snapshot),
        }
    }

    /// Apply a committed command on the leader.
    ///
    /// Leader commands originate from local mutation events that already
    /// updated local state; commitment only marks them durable across the
    /// cluster, so no state change happens here.
    pub fn apply_as_leader(&self, command: &Command) {
        tracing::debug!(?command, "committed on leader");
    }

    pub fn apply_storage_action(&self, action: &StorageAction) {
        match action {
            StorageAction::Init(state) => {
                *self.storage.write().unwrap() = state.clone();
            }
            StorageAction::SetAll { plugin_id, dict } => {
                self.set_all_storage(plugin_id, dict.clone());
            }
            StorageAction::Set {
                plugin_id,
                key,
                value,
            } => self.set_storage(plugin_id, key, value.clone()),
            StorageAction::DeleteAll { plugin_id } => self.delete_all_storage(plugin_id),
            StorageAction::Delete { plugin_id, key } => self.delete_storage(plugin_id, key),
        }
    }

    /// Bulk-load a snapshot image. Sessions and plugin dictionaries present
    /// in the image replace local ones; others are left untouched.
    pub fn restore_from_snapshot(&self, snapshot: &Snapshot) {
        tracing::debug!(
            last_included_index = snapshot.last_included_index,
            "restore state from snapshot"
        );
        {
            let mut sessions = self.sessions.write().unwrap();
            for (sid, session) in &snapshot.session {
                sessions.insert(sid.clone(), session.clone());
            }
        }
        let mut storage = self.storage.write().unwrap();
        for (plugin_id, dict) in &snapshot.storage {
            storage.insert(plugin_id.clone(), dict.clone());
        }
    }

    pub fn set_session(&self, sid: &str, session: Value) {
        self.sessions
            .write()
            .unwrap()
            .insert(sid.to_string(), session);
    }

    pub fn session(&self, sid: &str) -> Option<Value> {
        self.sessions.read().unwrap().get(sid).cloned()
    }

    pub fn sessions(&self) -> SessionDict {
        self.sessions.read().unwrap().clone()
    }

    pub fn set_storage(&self, plugin_id: &str, key: &str, value: Value) {
        self.storage
            .write()
            .unwrap()
            .entry(plugin_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn set_all_storage(&self, plugin_id: &str, dict: StorageDict) {
        self.storage
            .write()
            .unwrap()
            .insert(plugin_id.to_string(), dict);
    }

    pub fn delete_storage(&self, plugin_id: &str, key: &str) {
        if let Some(dict) = self.storage.write().unwrap().get_mut(plugin_id) {
            dict.remove(key);
        }
    }

    pub fn delete_all_storage(&self, plugin_id: &str) {
        self.storage
            .write()
            .unwrap()
            .insert(plugin_id.to_string(), StorageDict::default());
    }

    pub fn init_storage(&self, state: StorageState) {
        *self.storage.write().unwrap() = state;
    }

    pub fn storage_value(&self, plugin_id: &str, key: &str) -> Option<Value> {
        self.storage
            .read()
            .unwrap()
            .get(plugin_id)
            .and_then(|dict| dict.get(key))
            .cloned()
    }

    pub fn storage(&self) -> StorageState {
        self.storage.read().unwrap().clone()
    }
}
