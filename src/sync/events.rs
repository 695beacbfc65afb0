//! The mutation event source.
//!
//! Local writes (session saves, plugin storage calls) go through the
//! publisher: it updates the local applier state and emits the
//! corresponding replicated command. While this node is the leader, the
//! sync service forwards emitted commands into the raft log.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::sync::applier::StateApplier;
use crate::sync::commands::{Command, SessionData, StorageAction, StorageDict, StorageState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SyncPublisher {
    applier: Arc<StateApplier>,
    tx: broadcast::Sender<Command>,
}

impl SyncPublisher {
    pub fn new(applier: Arc<StateApplier>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { applier, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.tx.subscribe()
    }

    pub fn update_session(&self, sid: &str, session: Value) {
        self.applier.set_session(sid, session.clone());
        self.emit(Command::Session(SessionData {
            sid: sid.to_string(),
            session,
        }));
    }

    pub fn set_storage(&self, plugin_id: &str, key: &str, value: Value) {
        self.applier.set_storage(plugin_id, key, value.clone());
        self.emit(Command::Storage(StorageAction::Set {
            plugin_id: plugin_id.to_string(),
            key: key.to_string(),
            value,
        }));
    }

    pub fn set_all_storage(&self, plugin_id: &str, dict: StorageDict) {
        self.applier.set_all_storage(plugin_id, dict.clone());
        self.emit(Command::Storage(StorageAction::SetAll {
            plugin_id: plugin_id.to_string(),
            dict,
        }));
    }

    pub fn delete_storage(&self, plugin_id: &str, key: &str) {
        self.applier.delete_storage(plugin_id, key);
        self.emit(Command::Storage(StorageAction::Delete {
            plugin_id: plugin_id.to_string(),
            key: key.to_string(),
        }));
    }

    pub fn delete_all_storage(&self, plugin_id: &str) {
        self.applier.delete_all_storage(plugin_id);
        self.emit(Command::Storage(StorageAction::DeleteAll {
            plugin_id: plugin_id.to_string(),
        }));
    }

    pub fn init_storage(&self, state: StorageState) {
        self.applier.init_storage(state.clone());
        self.emit(Command::Storage(StorageAction::Init(state)));
    }

    fn emit(&self, command: Command) {
        tracing::debug!(?command, "emit sync event");
        // No receivers means no leader forwarding is active; local state
        // is already updated.
        let _ = self.tx.send(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publisher_updates_local_state_and_emits() {
        let applier = Arc::new(StateApplier::new());
        let publisher = SyncPublisher::new(applier.clone());
        let mut rx = publisher.subscribe();

        publisher.set_storage("p1", "k", json!("v"));
        assert_eq!(applier.storage_value("p1", "k"), Some(json!("v")));
        match rx.try_recv().unwrap() {
            Command::Storage(StorageAction::Set { plugin_id, key, .. }) => {
                assert_eq!(plugin_id, "p1");
                assert_eq!(key, "k");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn publisher_emits_session_commands() {
        let applier = Arc::new(StateApplier::new());
        let publisher = SyncPublisher::new(applier.clone());
        let mut rx = publisher.subscribe();

        publisher.update_session("s1", json!({"user": "fred"}));
        assert_eq!(applier.session("s1"), Some(json!({"user": "fred"})));
        assert!(matches!(rx.try_recv().unwrap(), Command::Session(_)));
    }

    #[test]
    fn publisher_works_without_subscribers() {
        let applier = Arc::new(StateApplier::new());
        let publisher = SyncPublisher::new(applier.clone());
        publisher.delete_all_storage("p1");
        assert_eq!(applier.storage().get("p1"), Some(&StorageDict::default()));
    }
}
