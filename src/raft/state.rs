use serde::{Deserialize, Serialize};

use crate::raft::snapshot::Snapshot;
use crate::sync::commands::Command;

/// Raft term. Terms increase monotonically starting at 0; -1 is the
/// pre-initialization sentinel used by `start_term` and conflict replies.
pub type Term = i64;

/// Logical log index, independent of the in-memory array offset after
/// compaction. -1 is the pre-initialization sentinel for `commit_index`,
/// `last_applied` and `match_index`.
pub type LogIndex = i64;

/// Peer id: the peer's index in the discovered membership list. -1 means
/// "none" (`voted_for`, `leader_id`).
pub type PeerId = i64;

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "Follower"),
            RaftRole::Candidate => write!(f, "Candidate"),
            RaftRole::Leader => write!(f, "Leader"),
        }
    }
}

/// A single entry in the raft log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: Command,
}

/// The raft state shared by all roles.
///
/// The live log covers logical indices `[start_index, len())`; entries
/// below `start_index` exist only inside a snapshot. Global index `i`
/// maps to `log[i - start_index]`.
#[derive(Debug)]
pub struct RaftState {
    // Persistent state
    pub current_term: Term,
    pub voted_for: PeerId,
    pub log: Vec<LogEntry>,
    pub start_index: LogIndex,
    pub start_term: Term,

    // Volatile state on all servers
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,

    // Volatile state on leaders (reinitialized after election)
    pub next_index: Vec<LogIndex>,
    pub match_index: Vec<LogIndex>,

    pub role: RaftRole,

    // Last observed leader (if any)
    pub leader_id: PeerId,

    // Most recent snapshot, used to catch up empty followers
    pub last_snapshot: Option<Snapshot>,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: -1,
            log: Vec::new(),
            start_index: 0,
            start_term: -1,
            commit_index: -1,
            last_applied: -1,
            next_index: Vec::new(),
            match_index: Vec::new(),
            role: RaftRole::Follower,
            leader_id: -1,
            last_snapshot: None,
        }
    }

    /// Logical length of the log: one past the last logical index.
    pub fn len(&self) -> LogIndex {
        self.log.len() as LogIndex + self.start_index
    }

    pub fn last_index(&self) -> LogIndex {
        self.len() - 1
    }

    pub fn relative_index(&self, index: LogIndex) -> usize {
        (index - self.start_index) as usize
    }

    /// Get the entry at a logical index, if it is still in the live log.
    pub fn item(&self, index: LogIndex) -> Option<&LogEntry> {
        if index < self.start_index || index >= self.len() {
            return None;
        }
        self.log.get(self.relative_index(index))
    }

    /// Term of the last log entry, falling back to the snapshot boundary
    /// term when the live log is empty.
    pub fn last_log_term(&self) -> Term {
        let last = self.last_index();
        if last >= self.start_index {
            self.item(last).map(|e| e.term).unwrap_or(self.start_term)
        } else {
            self.start_term
        }
    }

    pub fn has_entry_with_term(&self, index: LogIndex, term: Term) -> bool {
        self.item(index).map(|e| e.term == term) == Some(true)
    }

    /// Scan backward for the first entry of `term`, for conflict replies.
    pub fn first_index_of_term(&self, term: Term) -> LogIndex {
        let mut index = -1;
        let mut i = self.last_index();
        while i >= self.start_index {
            match self.item(i).map(|e| e.term) {
                Some(t) if t == term => index = i,
                Some(t) if t < term => break,
                _ => {}
            }
            i -= 1;
        }
        index
    }

    /// Append a new entry with the current term, returning its index.
    pub fn append_entry(&mut self, command: Command) -> LogIndex {
        self.log.push(LogEntry {
            term: self.current_term,
            command,
        });
        self.last_index()
    }

    /// Drop every entry at or above the logical index `from`.
    pub fn truncate_from(&mut self, from: LogIndex) {
        let from = from.max(self.start_index);
        self.log.truncate(self.relative_index(from));
    }

    /// Check if a candidate's log is at least as up-to-date as ours:
    /// compare last-log term first, then index.
    pub fn is_log_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        let my_last_term = self.last_log_term();
        if my_last_term == last_log_term {
            return last_log_index >= self.last_index();
        }
        last_log_term >= my_last_term
    }

    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    pub fn become_follower(&mut self, term: Term) {
        self.role = RaftRole::Follower;
        self.current_term = term;
        self.voted_for = -1;
    }

    pub fn become_candidate(&mut self, my_id: PeerId) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = my_id;
        self.leader_id = -1;
    }

    /// Reinitialize leader volatile state: `next_index` to one past the
    /// last log index, `match_index` to the sentinel.
    pub fn become_leader(&mut self, my_id: PeerId, peer_count: usize) {
        self.role = RaftRole::Leader;
        self.leader_id = my_id;
        let len = self.len();
        self.next_index = vec![len; peer_count];
        self.match_index = vec![-1; peer_count];
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::commands::{SessionData, StorageAction};
    use serde_json::json;

    fn session_cmd(sid: &str) -> Command {
        Command::Session(SessionData {
            sid: sid.to_string(),
            session: json!({}),
        })
    }

    fn set_cmd(key: &str) -> Command {
        Command::Storage(StorageAction::Set {
            plugin_id: "p".to_string(),
            key: key.to_string(),
            value: json!(1),
        })
    }

    #[test]
    fn new_state_is_follower() {
        let state = RaftState::new();
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 0);
        assert_eq!(state.voted_for, -1);
        assert_eq!(state.commit_index, -1);
        assert_eq!(state.last_applied, -1);
        assert_eq!(state.start_index, 0);
        assert_eq!(state.start_term, -1);
        assert!(state.log.is_empty());
    }

    #[test]
    fn logical_indexing_with_offset() {
        let mut state = RaftState::new();
        state.start_index = 5;
        state.start_term = 2;
        state.current_term = 3;
        state.append_entry(set_cmd("a"));
        state.append_entry(set_cmd("b"));

        assert_eq!(state.len(), 7);
        assert_eq!(state.last_index(), 6);
        assert!(state.item(4).is_none());
        assert!(state.item(5).is_some());
        assert!(state.item(7).is_none());
        assert_eq!(state.relative_index(6), 1);
    }

    #[test]
    fn last_log_term_falls_back_to_start_term() {
        let mut state = RaftState::new();
        state.start_index = 10;
        state.start_term = 4;
        assert_eq!(state.last_log_term(), 4);

        state.current_term = 5;
        state.append_entry(session_cmd("s"));
        assert_eq!(state.last_log_term(), 5);
    }

    #[test]
    fn become_candidate_increments_term_and_votes_for_self() {
        let mut state = RaftState::new();
        state.become_candidate(1);
        assert_eq!(state.role, RaftRole::Candidate);
        assert_eq!(state.current_term, 1);
        assert_eq!(state.voted_for, 1);
        assert_eq!(state.leader_id, -1);
    }

    #[test]
    fn become_leader_reinitializes_peer_indices() {
        let mut state = RaftState::new();
        state.current_term = 1;
        state.append_entry(set_cmd("a"));
        state.become_candidate(0);
        state.become_leader(0, 3);

        assert_eq!(state.role, RaftRole::Leader);
        assert_eq!(state.next_index, vec![1, 1, 1]);
        assert_eq!(state.match_index, vec![-1, -1, -1]);
    }

    #[test]
    fn become_follower_adopts_term_and_clears_vote() {
        let mut state = RaftState::new();
        state.become_candidate(1);
        state.become_follower(5);
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, -1);
    }

    #[test]
    fn is_log_up_to_date_compares_term_then_index() {
        let mut state = RaftState::new();
        assert!(state.is_log_up_to_date(-1, -1));

        state.current_term = 1;
        state.append_entry(set_cmd("a"));
        state.current_term = 2;
        state.append_entry(set_cmd("b"));

        // Higher term is always up-to-date
        assert!(state.is_log_up_to_date(0, 3));
        // Same term, same or higher index is up-to-date
        assert!(state.is_log_up_to_date(1, 2));
        assert!(state.is_log_up_to_date(5, 2));
        // Same term, lower index is not
        assert!(!state.is_log_up_to_date(0, 2));
        // Lower term is never up-to-date
        assert!(!state.is_log_up_to_date(5, 1));
    }

    #[test]
    fn first_index_of_term_scans_backward() {
        let mut state = RaftState::new();
        state.current_term = 1;
        state.append_entry(set_cmd("a"));
        state.append_entry(set_cmd("b"));
        state.current_term = 2;
        state.append_entry(set_cmd("c"));
        state.current_term = 3;
        state.append_entry(set_cmd("d"));

        assert_eq!(state.first_index_of_term(2), 2);
        assert_eq!(state.first_index_of_term(3), 3);
        assert_eq!(state.first_index_of_term(1), 0);
        assert_eq!(state.first_index_of_term(7), -1);
    }

    #[test]
    fn truncate_from_respects_start_index() {
        let mut state = RaftState::new();
        state.current_term = 1;
        state.append_entry(set_cmd("a"));
        state.append_entry(set_cmd("b"));
        state.append_entry(set_cmd("c"));

        state.truncate_from(1);
        assert_eq!(state.len(), 1);

        state.start_index = 1;
        state.start_term = 1;
        // Truncating below the compaction boundary clears the live log only
        state.truncate_from(0);
        assert_eq!(state.len(), 1);
        assert!(state.log.is_empty());
    }
}
