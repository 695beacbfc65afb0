//! Snapshot construction and log compaction.
//!
//! A snapshot is a compacted point-in-time image of the replicated state
//! plus the (index, term) of the last log entry it subsumes. After a
//! snapshot is installed or taken, the live log starts at
//! `last_included_index + 1`.

use serde::{Deserialize, Serialize};

use crate::raft::state::{LogIndex, RaftState, Term};
use crate::sync::commands::{Command, SessionDict, StorageAction, StorageState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session: SessionDict,
    pub storage: StorageState,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
}

/// Fold committed log entries into a snapshot image, reusing a prior
/// snapshot's image as the base when present.
///
/// The caller guarantees `last_included` is applied, i.e.
/// `last_included <= state.last_applied`.
pub fn build_snapshot(
    state: &RaftState,
    last_included: LogIndex,
    base: Option<&Snapshot>,
) -> Snapshot {
    let last_included_term = state
        .item(last_included)
        .map(|e| e.term)
        .unwrap_or(state.start_term);
    let mut snapshot = Snapshot {
        session: base.map(|s| s.session.clone()).unwrap_or_default(),
        storage: base.map(|s| s.storage.clone()).unwrap_or_default(),
        last_included_index: last_included,
        last_included_term,
    };
    let mut index = state.start_index;
    while index <= last_included {
        if let Some(entry) = state.item(index) {
            fold_command(&mut snapshot, &entry.command);
        }
        index += 1;
    }
    snapshot
}

fn fold_command(snapshot: &mut Snapshot, command: &Command) {
    match command {
        Command::Session(data) => {
            snapshot
                .session
                .insert(data.sid.clone(), data.session.clone());
        }
        Command::Storage(action) => fold_storage_action(&mut snapshot.storage, action),
        // Snapshot commands are synthetic apply messages, never log entries.
        Command::Snapshot(_) => {}
    }
}

fn fold_storage_action(storage: &mut StorageState, action: &StorageAction) {
    match action {
        StorageAction::Init(state) => *storage = state.clone(),
        StorageAction::SetAll { plugin_id, dict } => {
            storage.insert(plugin_id.clone(), dict.clone());
        }
        StorageAction::Set {
            plugin_id,
            key,
            value,
        } => {
            storage
                .entry(plugin_id.clone())
                .or_default()
                .insert(key.clone(), value.clone());
        }
        StorageAction::DeleteAll { plugin_id } => {
            storage.insert(plugin_id.clone(), Default::default());
        }
        StorageAction::Delete { plugin_id, key } => {
            if let Some(dict) = storage.get_mut(plugin_id) {
                dict.remove(key);
            }
        }
    }
}

/// Discard the log prefix covered by `snapshot`.
///
/// If the log still holds the entry at the snapshot boundary with a
/// matching term, entries following it are retained; otherwise the whole
/// live log is dropped. Afterwards `start_index = last_included_index + 1`.
pub fn discard_log(state: &mut RaftState, snapshot: &Snapshot) {
    let last_included_index = snapshot.last_included_index;
    let last_included_term = snapshot.last_included_term;
    if state.has_entry_with_term(last_included_index, last_included_term) {
        let keep_from = state.relative_index(last_included_index + 1);
        state.log.drain(..keep_from);
    } else {
        state.log.clear();
    }
    state.start_index = last_included_index + 1;
    state.start_term = last_included_term;
}
