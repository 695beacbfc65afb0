//! Replicated command types.
//!
//! These are the payloads carried by raft log entries. The JSON encoding is
//! shared with the persisted log and the peer wire format, so field names
//! and tag spellings here are load-bearing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::raft::snapshot::Snapshot;

/// One plugin's key-value dictionary.
pub type StorageDict = HashMap<String, Value>;

/// The whole key-value store, namespaced per plugin.
pub type StorageState = HashMap<String, StorageDict>;

/// All sessions, keyed by session id.
pub type SessionDict = HashMap<String, Value>;

/// A session replacement, replicated wholesale on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub sid: String,
    pub session: Value,
}

/// A mutation of the namespaced key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum StorageAction {
    /// Bulk replace of the entire store.
    Init(StorageState),
    /// Replace one plugin's dictionary.
    #[serde(rename_all = "camelCase")]
    SetAll { plugin_id: String, dict: StorageDict },
    /// Set one key.
    #[serde(rename_all = "camelCase")]
    Set {
        plugin_id: String,
        key: String,
        value: Value,
    },
    /// Clear one plugin's dictionary.
    #[serde(rename_all = "camelCase")]
    DeleteAll { plugin_id: String },
    /// Remove one key.
    #[serde(rename_all = "camelCase")]
    Delete { plugin_id: String, key: String },
}

/// A command replicated through the raft log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Command {
    Session(SessionData),
    Storage(StorageAction),
    Snapshot(Snapshot),
}
