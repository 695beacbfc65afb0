//! Durable storage of raft state and snapshots.
//!
//! Both responsibilities fail independently and never throw out of the
//! consensus loop: a write failure is logged and ignored, keeping the
//! process serving from memory.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::PersistenceConfig;
use crate::raft::state::{LogEntry, LogIndex, PeerId, RaftState, Term};

/// The persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub current_term: Term,
    pub voted_for: PeerId,
    pub log: Vec<LogEntry>,
    pub start_index: LogIndex,
    pub start_term: Term,
}

impl PersistedState {
    pub fn from_state(state: &RaftState) -> Self {
        Self {
            current_term: state.current_term,
            voted_for: state.voted_for,
            log: state.log.clone(),
            start_index: state.start_index,
            start_term: state.start_term,
        }
    }

    pub fn restore_into(self, state: &mut RaftState) {
        state.current_term = self.current_term;
        state.voted_for = self.voted_for;
        state.log = self.log;
        state.start_index = self.start_index;
        state.start_term = self.start_term;
    }
}

pub trait Persister: Send + Sync {
    fn save_state(&self, state: &str);
    fn save_snapshot(&self, snapshot: &str);
    fn read_state(&self) -> Option<String>;
    fn read_snapshot(&self) -> Option<String>;

    fn save_state_and_snapshot(&self, state: &str, snapshot: &str) {
        self.save_state(state);
        self.save_snapshot(snapshot);
    }
}

/// File-backed persister writing synchronous, best-effort.
pub struct FilePersister {
    state_filename: PathBuf,
    snapshot_filename: PathBuf,
}

impl FilePersister {
    pub fn new(state_filename: PathBuf, snapshot_filename: PathBuf) -> Self {
        tracing::debug!(state_file = %state_filename.display(), "raft state file");
        Self {
            state_filename,
            snapshot_filename,
        }
    }
}

impl Persister for FilePersister {
    fn save_state(&self, state: &str) {
        if let Err(e) = fs::write(&self.state_filename, state) {
            tracing::warn!(error = %e, "unable to save raft persistent state");
        }
    }

    fn save_snapshot(&self, snapshot: &str) {
        if let Err(e) = fs::write(&self.snapshot_filename, snapshot) {
            tracing::warn!(error = %e, "unable to save storage snapshot");
        }
    }

    fn read_state(&self) -> Option<String> {
        match fs::read_to_string(&self.state_filename) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(error = %e, "unable to read raft persistent state");
                None
            }
        }
    }

    fn read_snapshot(&self) -> Option<String> {
        match fs::read_to_string(&self.snapshot_filename) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(error = %e, "unable to read storage snapshot");
                None
            }
        }
    }
}

/// No-op persister for pure in-memory operation.
pub struct NoopPersister;

impl Persister for NoopPersister {
    fn save_state(&self, _state: &str) {}
    fn save_snapshot(&self, _snapshot: &str) {}
    fn read_state(&self) -> Option<String> {
        None
    }
    fn read_snapshot(&self) -> Option<String> {
        None
    }
}

/// Build a persister from configuration.
pub fn make_persister(config: &PersistenceConfig) -> Box<dyn Persister> {
    if config.enabled {
        if let (Some(state_file), Some(snapshot_file)) = (config.state_file(), config.snapshot_file())
        {
            tracing::info!("raft persistence enabled");
            return Box::new(FilePersister::new(state_file, snapshot_file));
        }
        tracing::warn!("raft persistence enabled but no data directory configured");
    }
    tracing::info!("raft persistence disabled");
    Box::new(NoopPersister)
}
