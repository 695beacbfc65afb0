//! RPC payload types and the pure request handlers.
//!
//! Handlers mutate a `RaftState` and build a reply; everything with a
//! side effect beyond the state struct (persistence, timers, applying
//! committed commands) is the caller's job. This keeps the log-matching
//! logic testable without a cluster.

use serde::{Deserialize, Serialize};

use crate::raft::snapshot::Snapshot;
use crate::raft::state::{LogEntry, LogIndex, PeerId, RaftRole, RaftState, Term};
use crate::sync::commands::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: PeerId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: PeerId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

/// Diagnostic payload from a rejected AppendEntries enabling an efficient
/// backward jump of `next_index` instead of linear decrement. `-1` marks
/// an absent conflict index/term (the follower's log was too short).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub conflict_index: LogIndex,
    pub conflict_term: Term,
    pub log_length: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conflict: Option<Conflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSnapshotArgs {
    pub term: Term,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSnapshotReply {
    pub success: bool,
}

/// Handle a RequestVote RPC.
///
/// Grants iff the candidate's term is current, we have not voted for a
/// different candidate this term, and the candidate's log is at least as
/// up-to-date as ours (last-log term, then index).
pub fn handle_request_vote(state: &mut RaftState, args: &RequestVoteArgs) -> RequestVoteReply {
    if args.term > state.current_term {
        tracing::debug!(
            term = args.term,
            current_term = state.current_term,
            "observed greater term in vote request, converting to follower"
        );
        state.become_follower(args.term);
    }

    let vote_granted = if args.term < state.current_term {
        false
    } else if state.voted_for != -1 && state.voted_for != args.candidate_id {
        false
    } else if !state.is_log_up_to_date(args.last_log_index, args.last_log_term) {
        false
    } else {
        state.voted_for = args.candidate_id;
        true
    };

    tracing::debug!(
        candidate = args.candidate_id,
        term = args.term,
        granted = vote_granted,
        "RequestVote handled"
    );

    RequestVoteReply {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle an AppendEntries RPC.
///
/// Returns the reply plus the commands that became committed by this
/// request, in strictly increasing index order, for the caller to apply.
pub fn handle_append_entries(
    state: &mut RaftState,
    args: &AppendEntriesArgs,
) -> (AppendEntriesReply, Vec<(LogIndex, Command)>) {
    if args.term > state.current_term {
        state.become_follower(args.term);
    }

    // 1. Reply false if term < currentTerm
    if args.term < state.current_term {
        let reply = AppendEntriesReply {
            term: state.current_term,
            success: false,
            conflict: None,
        };
        return (reply, Vec::new());
    }

    // A valid AppendEntries from the current leader: any non-follower
    // reverts, and we record who the leader is.
    if state.role != RaftRole::Follower {
        state.become_follower(args.term);
    }
    state.leader_id = args.leader_id;

    if args.prev_log_index >= state.start_index {
        // 2. Reply false if the log has no entry at prevLogIndex
        if args.prev_log_index >= state.len() {
            let reply = AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict: Some(Conflict {
                    conflict_index: -1,
                    conflict_term: -1,
                    log_length: state.len(),
                }),
            };
            return (reply, Vec::new());
        }
        // 3. An existing entry conflicts with a new one (same index,
        // different terms): delete it and all that follow it.
        let prev_log_term = state
            .item(args.prev_log_index)
            .map(|e| e.term)
            .unwrap_or(-1);
        if prev_log_term != args.prev_log_term {
            state.truncate_from(args.prev_log_index);
            let conflict = Conflict {
                conflict_term: prev_log_term,
                conflict_index: state.first_index_of_term(prev_log_term),
                log_length: state.len(),
            };
            tracing::debug!(?conflict, "log mismatch at prevLogIndex, truncated suffix");
            let reply = AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict: Some(conflict),
            };
            return (reply, Vec::new());
        }
    }

    // 4. Append any new entries not already in the log
    if !args.entries.is_empty() {
        if args.prev_log_index < state.last_index() {
            state.truncate_from(args.prev_log_index + 1);
        }
        // Entries subsumed by a snapshot stay in the snapshot.
        let skip = (state.start_index - (args.prev_log_index + 1)).max(0) as usize;
        state.log.extend(args.entries.iter().skip(skip).cloned());
    }

    // 5. If leaderCommit > commitIndex, set
    //    commitIndex = min(leaderCommit, index of last new entry)
    let last_new_entry_index = state.last_index();
    if args.leader_commit > state.commit_index {
        state.commit_index = args.leader_commit.min(last_new_entry_index);
    }

    let mut newly_committed = Vec::new();
    while state.last_applied < state.commit_index {
        state.last_applied += 1;
        if state.last_applied < state.start_index {
            continue;
        }
        if let Some(entry) = state.item(state.last_applied) {
            newly_committed.push((state.last_applied, entry.command.clone()));
        }
    }

    let reply = AppendEntriesReply {
        term: state.current_term,
        success: true,
        conflict: None,
    };
    (reply, newly_committed)
}
