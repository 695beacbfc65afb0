//! The raft consensus core: leader election, log replication, commitment
//! and compaction.
//!
//! One `RaftNode` exists per process, constructed by the composition root
//! and passed by reference to its collaborators. Per-peer fan-out runs as
//! independent tasks; every task re-checks the role and originating term
//! after each await before acting on a reply.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::peer::Peer;
use crate::raft::persist::{PersistedState, Persister};
use crate::raft::rpc::{
    self, AppendEntriesArgs, AppendEntriesReply, Conflict, InstallSnapshotArgs,
    InstallSnapshotReply, RequestVoteArgs, RequestVoteReply,
};
use crate::raft::snapshot::{self, Snapshot};
use crate::raft::state::{LogIndex, PeerId, RaftRole, RaftState, Term};
use crate::raft::timer::random_election_timeout;
use crate::registry::RegistryClient;
use crate::sync::applier::StateApplier;
use crate::sync::commands::Command;

const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_millis(50);
const AGREEMENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a write submitted through `start_command`.
#[derive(Debug, Clone, Copy)]
pub struct StartCommandOutcome {
    pub index: LogIndex,
    pub term: Term,
    pub is_leader: bool,
}

/// Role summary exposed to the redirect middleware and the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaftStateSummary {
    pub started: bool,
    pub state: RaftRole,
    #[serde(rename = "leaderBaseURL")]
    pub leader_base_url: Option<String>,
    pub term: Term,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub log_length: LogIndex,
    pub start_index: LogIndex,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReplicationKind {
    /// Periodic round: ships everything from the peer's `next_index`
    /// through the log tail (empty when the peer is caught up).
    Heartbeat,
    /// Agreement round for a fresh entry: ships through `commit_index + 1`.
    Agreement,
}

struct Membership {
    peers: Vec<Arc<Peer>>,
    me: usize,
}

pub struct RaftNode {
    self_ref: Weak<RaftNode>,
    config: NodeConfig,
    pub state: RwLock<RaftState>,
    applier: Arc<StateApplier>,
    persister: Box<dyn Persister>,
    registry: Arc<dyn RegistryClient>,
    membership: OnceLock<Membership>,
    started: AtomicBool,
    compacting: AtomicBool,
    election_timeout: Duration,
    last_heartbeat: RwLock<Instant>,
    state_tx: watch::Sender<RaftRole>,
    commit_tx: watch::Sender<LogIndex>,
}

impl RaftNode {
    pub fn new(
        config: NodeConfig,
        applier: Arc<StateApplier>,
        persister: Box<dyn Persister>,
        registry: Arc<dyn RegistryClient>,
    ) -> Arc<Self> {
        let election_timeout = random_election_timeout(
            config.election_timeout_min_ms,
            config.election_timeout_max_ms,
        );
        let (state_tx, _) = watch::channel(RaftRole::Follower);
        let (commit_tx, _) = watch::channel(-1);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            state: RwLock::new(RaftState::new()),
            applier,
            persister,
            registry,
            membership: OnceLock::new(),
            started: AtomicBool::new(false),
            compacting: AtomicBool::new(false),
            election_timeout,
            last_heartbeat: RwLock::new(Instant::now()),
            state_tx,
            commit_tx,
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("raft node is alive")
    }

    /// Bootstrap: take self out of service, discover the fixed membership,
    /// load persisted state/snapshot and arm the election timer.
    ///
    /// If this instance is not among the discovered members the node stays
    /// un-started and participates in nothing — an inert spare, not an
    /// error.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(
            election_timeout_ms = self.election_timeout.as_millis() as u64,
            heartbeat_interval_ms = self.config.heartbeat_interval_ms,
            "starting raft peer"
        );
        let my_id = self.registry.instance_id();
        self.registry.take_instance_out_of_service(&my_id).await?;

        let instances = self
            .registry
            .wait_until_cluster_ready(self.config.min_cluster_size)
            .await?;
        tracing::debug!(count = instances.len(), "cluster is ready");

        let Some(me) = instances.iter().position(|i| i.instance_id == my_id) else {
            tracing::warn!(
                instance = %my_id,
                "unable to find my instance among registered gateway instances"
            );
            return Ok(());
        };
        let peers: Vec<Arc<Peer>> = instances
            .iter()
            .map(|info| Arc::new(Peer::from_instance(info, self.registry.clone())))
            .collect();
        let _ = self.membership.set(Membership { peers, me });

        if let Some(doc) = self.persister.read_snapshot() {
            match serde_json::from_str::<Snapshot>(&doc) {
                Ok(snap) => {
                    self.applier.restore_from_snapshot(&snap);
                    self.state.write().await.last_snapshot = Some(snap);
                }
                Err(e) => tracing::warn!(error = %e, "unable to decode snapshot"),
            }
        }
        if let Some(doc) = self.persister.read_state() {
            match serde_json::from_str::<PersistedState>(&doc) {
                Ok(persisted) => {
                    let mut st = self.state.write().await;
                    persisted.restore_into(&mut st);
                    tracing::debug!(
                        term = st.current_term,
                        voted_for = st.voted_for,
                        log_len = st.log.len(),
                        "read persistent state"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "unable to decode state"),
            }
        }

        self.spawn_reregistration_handler();
        self.started.store(true, Ordering::SeqCst);
        let log_empty = self.state.read().await.log.is_empty();
        tracing::info!(
            peer = me,
            log = if log_empty { "empty" } else { "not empty" },
            "raft peer started"
        );
        Ok(())
    }

    /// Protection against the registry re-registering this instance with a
    /// default (in-service) status while it is not the leader.
    fn spawn_reregistration_handler(&self) {
        let mut rx = self.registry.subscribe_reregistration();
        let node = self.arc();
        tokio::spawn(async move {
            while rx.recv().await.is_ok() {
                if !node.is_leader().await {
                    if let Some(peer) = node.my_peer() {
                        match peer.take_out_of_service().await {
                            Ok(()) => {
                                tracing::info!("taken out of service after forced re-registration")
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "unable to take self out of service")
                            }
                        }
                    }
                }
            }
        });
    }

    /// Drive the election/heartbeat timers until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.is_started() {
            cancel.cancelled().await;
            return;
        }
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let mut state_rx = self.subscribe_state();
        loop {
            let role = self.state.read().await.role;
            tokio::select! {
                _ = cancel.cancelled() => break,

                // Role changed (e.g. a vote task won the election):
                // re-evaluate which timer drives the loop.
                _ = state_rx.changed() => {}

                _ = tokio::time::sleep(self.election_timeout), if role != RaftRole::Leader => {
                    let elapsed = self.last_heartbeat.read().await.elapsed();
                    if elapsed >= self.election_timeout {
                        tracing::info!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            "election timeout, starting election"
                        );
                        self.attempt_election().await;
                    }
                }

                _ = tokio::time::sleep(heartbeat_interval), if role == RaftRole::Leader => {
                    self.send_heartbeat().await;
                }
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.is_leader()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RaftRole> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_commits(&self) -> watch::Receiver<LogIndex> {
        self.commit_tx.subscribe()
    }

    pub fn peers(&self) -> &[Arc<Peer>] {
        self.membership
            .get()
            .map(|m| m.peers.as_slice())
            .unwrap_or(&[])
    }

    fn me(&self) -> PeerId {
        self.membership
            .get()
            .map(|m| m.me as PeerId)
            .unwrap_or(-1)
    }

    fn peer_count(&self) -> usize {
        self.peers().len()
    }

    fn my_peer(&self) -> Option<Arc<Peer>> {
        self.membership.get().map(|m| m.peers[m.me].clone())
    }

    fn emit_state(&self, st: &RaftState) {
        self.state_tx.send_replace(st.role);
    }

    async fn attempt_election(&self) {
        let me = self.me();
        let (term, last_log_index, last_log_term) = {
            let mut st = self.state.write().await;
            if st.is_leader() {
                return;
            }
            let prev_role = st.role;
            st.become_candidate(me);
            if prev_role != RaftRole::Candidate {
                self.emit_state(&st);
            }
            (st.current_term, st.last_index(), st.last_log_term())
        };
        tracing::info!(term, "attempting election");

        let args = RequestVoteArgs {
            term,
            candidate_id: me,
            last_log_index,
            last_log_term,
        };
        let votes = Arc::new(AtomicUsize::new(1));
        for server in 0..self.peer_count() {
            if server as PeerId == me {
                continue;
            }
            let node = self.arc();
            let args = args.clone();
            let votes = votes.clone();
            tokio::spawn(async move {
                node.request_vote_from(server, args, votes).await;
            });
        }
    }

    async fn request_vote_from(
        &self,
        server: usize,
        args: RequestVoteArgs,
        votes: Arc<AtomicUsize>,
    ) {
        let peer = self.peers()[server].clone();
        let term = args.term;
        let reply = match peer.rpc().send_request_vote(args).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(server, error = %e, "vote request failed");
                return;
            }
        };
        self.ensure_response_term(reply.term).await;
        if !reply.vote_granted {
            tracing::debug!(server, "vote not granted");
            return;
        }

        let mut st = self.state.write().await;
        if st.role != RaftRole::Candidate || st.current_term != term {
            tracing::debug!(server, "got vote but election already finished");
            return;
        }
        let votes_now = votes.fetch_add(1, Ordering::SeqCst) + 1;
        if votes_now > self.peer_count() / 2 {
            st.become_leader(self.me(), self.peer_count());
            tracing::info!(term, votes = votes_now, "became leader");
            self.emit_state(&st);
            drop(st);
            self.send_heartbeat().await;
        } else {
            tracing::debug!(
                server,
                votes = votes_now,
                "not enough votes yet to become leader"
            );
        }
    }

    async fn send_heartbeat(&self) {
        let me = self.me();
        for server in 0..self.peer_count() {
            if server as PeerId == me {
                continue;
            }
            let node = self.arc();
            tokio::spawn(async move {
                node.replicate_to_peer(server, ReplicationKind::Heartbeat).await;
            });
        }
    }

    async fn replicate_to_peer(&self, server: usize, kind: ReplicationKind) {
        let (args, sent_up_to, term) = {
            let st = self.state.read().await;
            if !st.is_leader() {
                tracing::debug!(server, "cancel replication because not leader anymore");
                return;
            }
            let term = st.current_term;
            let next = st.next_index[server];
            let last = match kind {
                ReplicationKind::Agreement => (st.commit_index + 1).min(st.last_index()),
                ReplicationKind::Heartbeat => st.last_index(),
            };
            let start = next.max(st.start_index);
            let mut entries = Vec::new();
            let mut index = start;
            while index <= last {
                if let Some(entry) = st.item(index) {
                    entries.push(entry.clone());
                }
                index += 1;
            }
            let sent_up_to = if entries.is_empty() {
                -1
            } else {
                start + entries.len() as LogIndex - 1
            };
            let prev_log_index = next - 1;
            let prev_log_term = st.item(prev_log_index).map(|e| e.term).unwrap_or(-1);
            let args = AppendEntriesArgs {
                term,
                leader_id: self.me(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: st.commit_index,
            };
            (args, sent_up_to, term)
        };

        let entry_count = args.entries.len();
        let peer = self.peers()[server].clone();
        let reply = match peer.rpc().send_append_entries(args).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::trace!(server, error = %e, "AppendEntries failed");
                return;
            }
        };
        self.ensure_response_term(reply.term).await;

        let mut st = self.state.write().await;
        if !st.is_leader() || st.current_term != term {
            return;
        }
        if reply.success {
            if entry_count > 0 {
                st.next_index[server] = sent_up_to + 1;
                st.match_index[server] = st.match_index[server].max(sent_up_to);
                tracing::debug!(
                    server,
                    next_index = st.next_index[server],
                    match_index = st.match_index[server],
                    "entries appended on peer"
                );
            }
            self.check_if_committed(&mut st);
        } else if let Some(conflict) = reply.conflict {
            tracing::debug!(server, ?conflict, "adjusting nextIndex after conflict");
            self.adjust_next_index(&mut st, server, &conflict, term);
        }
    }

    fn adjust_next_index(
        &self,
        st: &mut RaftState,
        server: usize,
        conflict: &Conflict,
        term: Term,
    ) {
        if conflict.conflict_index == -1 && conflict.conflict_term == -1 {
            if conflict.log_length == 0 && st.last_snapshot.is_some() {
                tracing::debug!(
                    server,
                    "follower's log is empty and a snapshot exists, sending the snapshot"
                );
                let snapshot = st.last_snapshot.clone().expect("checked above");
                let node = self.arc();
                tokio::spawn(async move {
                    node.install_snapshot_on_peer(server, term, snapshot).await;
                });
            } else {
                st.next_index[server] = conflict.log_length;
            }
        } else if conflict.conflict_index != -1 {
            st.next_index[server] = conflict.conflict_index;
        } else if st.next_index[server] > st.start_index {
            st.next_index[server] -= 1;
        }
    }

    /// Advance `commit_index` to the greatest index replicated on a
    /// majority (counting the leader itself) whose entry is from the
    /// current term, then apply everything newly committed in order.
    fn check_if_committed(&self, st: &mut RaftState) {
        let quorum = self.peer_count() / 2 + 1;
        let me = self.me();

        let mut counts: BTreeMap<LogIndex, usize> = BTreeMap::new();
        for (peer, &match_index) in st.match_index.iter().enumerate() {
            if peer as PeerId != me && match_index > st.commit_index {
                *counts.entry(match_index).or_insert(0) += 1;
            }
        }

        // Walking down, `replicated` is the number of peers (plus the
        // leader) holding at least `index`.
        let mut replicated = 1;
        let mut new_commit = st.commit_index;
        for (&index, &count) in counts.iter().rev() {
            replicated += count;
            if replicated >= quorum && st.item(index).map(|e| e.term) == Some(st.current_term) {
                new_commit = index;
                break;
            }
        }
        if new_commit <= st.commit_index {
            return;
        }
        st.commit_index = new_commit;
        tracing::debug!(commit_index = new_commit, "advanced commit index");
        self.apply_committed(st);
        self.commit_tx.send_replace(st.commit_index);
    }

    fn apply_committed(&self, st: &mut RaftState) {
        while st.last_applied < st.commit_index {
            st.last_applied += 1;
            if st.last_applied < st.start_index {
                continue;
            }
            let index = st.last_applied;
            let Some(command) = st.item(index).map(|e| e.command.clone()) else {
                break;
            };
            self.on_commit(st, index, &command);
        }
    }

    /// Single commit dispatcher: leaders never re-apply their own
    /// commands (local state already reflects them) but check for
    /// compaction; followers apply directly.
    fn on_commit(&self, st: &mut RaftState, index: LogIndex, command: &Command) {
        if st.is_leader() {
            self.applier.apply_as_leader(command);
            self.maybe_compact(st);
        } else {
            self.applier.apply_as_follower(command);
        }
        tracing::debug!(index, "applied committed entry");
    }

    fn maybe_compact(&self, st: &RaftState) {
        let max_log_size = self.config.max_log_size;
        if max_log_size <= 0 || (st.log.len() as i64) <= max_log_size {
            return;
        }
        if self
            .compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::info!(
            log_len = st.log.len(),
            max_log_size,
            "raft log size exceeds max log size"
        );
        let node = self.arc();
        tokio::spawn(async move {
            node.compact().await;
            node.compacting.store(false, Ordering::SeqCst);
        });
    }

    async fn compact(&self) {
        let snapshot = {
            let st = self.state.read().await;
            if !st.is_leader() || st.last_applied < st.start_index {
                return;
            }
            snapshot::build_snapshot(&st, st.last_applied, st.last_snapshot.as_ref())
        };
        self.discard_log_if_leader(snapshot).await;
    }

    async fn discard_log_if_leader(&self, snapshot: Snapshot) {
        let term = {
            let mut st = self.state.write().await;
            if !st.is_leader() {
                tracing::debug!("unable to discard log because not leader");
                return;
            }
            snapshot::discard_log(&mut st, &snapshot);
            st.last_snapshot = Some(snapshot.clone());
            self.persist_state_and_snapshot(&st);
            tracing::debug!(start_index = st.start_index, "log discarded");
            st.current_term
        };
        for server in 0..self.peer_count() {
            if server as PeerId == self.me() {
                continue;
            }
            let node = self.arc();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                node.install_snapshot_on_peer(server, term, snapshot).await;
            });
        }
    }

    /// Push a snapshot to one peer, retrying with a fixed delay until it
    /// acknowledges (or rejects) or leadership is lost.
    async fn install_snapshot_on_peer(&self, server: usize, term: Term, snapshot: Snapshot) {
        loop {
            {
                let st = self.state.read().await;
                if !st.is_leader() || st.current_term != term {
                    return;
                }
            }
            let peer = self.peers()[server].clone();
            let args = InstallSnapshotArgs {
                term,
                snapshot: snapshot.clone(),
            };
            match peer.rpc().send_install_snapshot(args).await {
                Ok(reply) if reply.success => {
                    tracing::debug!(server, "snapshot successfully installed on peer");
                    return;
                }
                Ok(_) => {
                    tracing::debug!(server, "snapshot rejected by peer");
                    return;
                }
                Err(e) => {
                    tracing::trace!(
                        server,
                        error = %e,
                        "snapshot not installed, repeating after a delay"
                    );
                    tokio::time::sleep(SNAPSHOT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Leader-only write entry point. Appends locally, persists, and
    /// asynchronously drives agreement to every peer. Non-leaders return
    /// `is_leader = false` immediately; the caller must redirect the
    /// write.
    pub async fn start_command(&self, command: Command) -> StartCommandOutcome {
        if !self.is_started() {
            return StartCommandOutcome {
                index: -1,
                term: 0,
                is_leader: false,
            };
        }
        let mut st = self.state.write().await;
        let term = st.current_term;
        if !st.is_leader() {
            return StartCommandOutcome {
                index: -1,
                term,
                is_leader: false,
            };
        }
        let index = st.append_entry(command);
        self.persist_state(&st, "after new command added into log");
        tracing::debug!(index, term, "got command, starting agreement");
        drop(st);

        let node = self.arc();
        tokio::spawn(async move {
            node.start_agreement(index).await;
        });
        StartCommandOutcome {
            index,
            term,
            is_leader: true,
        }
    }

    async fn start_agreement(&self, index: LogIndex) {
        if self.wait_for_previous_agreement(index - 1).await {
            tracing::debug!(index, "entry already committed");
            return;
        }
        if !self.is_leader().await {
            tracing::debug!(index, "not leader anymore, cancel agreement");
            return;
        }
        tracing::debug!(index, "starting agreement");
        let me = self.me();
        for server in 0..self.peer_count() {
            if server as PeerId == me {
                continue;
            }
            let node = self.arc();
            tokio::spawn(async move {
                node.replicate_to_peer(server, ReplicationKind::Agreement).await;
            });
        }
    }

    /// Returns true if the entry after `index` is already committed.
    async fn wait_for_previous_agreement(&self, index: LogIndex) -> bool {
        if index < 0 {
            return false;
        }
        loop {
            {
                let st = self.state.read().await;
                if !st.is_leader() {
                    return false;
                }
                if index < st.commit_index {
                    return true;
                }
                if index == st.commit_index {
                    return false;
                }
            }
            tokio::time::sleep(AGREEMENT_POLL_INTERVAL).await;
        }
    }

    /// Step down if a reply carries a greater term.
    async fn ensure_response_term(&self, reply_term: Term) {
        let mut st = self.state.write().await;
        if reply_term > st.current_term {
            tracing::debug!(
                reply_term,
                current_term = st.current_term,
                "observed greater term in reply, converting to follower"
            );
            let was_follower = st.role == RaftRole::Follower;
            st.become_follower(reply_term);
            if !was_follower {
                self.emit_state(&st);
            }
        }
    }

    /// RequestVote RPC entry point; persists before replying.
    pub async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        if !self.is_started() {
            tracing::debug!("not started yet, rejecting vote request");
            return RequestVoteReply {
                term: 0,
                vote_granted: false,
            };
        }
        let mut st = self.state.write().await;
        let prev_role = st.role;
        let reply = rpc::handle_request_vote(&mut st, &args);
        self.persist_state(&st, "after requestVote");
        if st.role != prev_role {
            self.emit_state(&st);
        }
        drop(st);
        if reply.vote_granted {
            *self.last_heartbeat.write().await = Instant::now();
        }
        reply
    }

    /// AppendEntries RPC entry point; applies newly committed entries in
    /// order and persists before replying.
    pub async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        if !self.is_started() {
            tracing::debug!("not started yet, rejecting append entries");
            return AppendEntriesReply {
                term: 0,
                success: false,
                conflict: None,
            };
        }
        let mut st = self.state.write().await;
        let prev_role = st.role;
        let prev_commit = st.commit_index;
        let (reply, newly_committed) = rpc::handle_append_entries(&mut st, &args);
        for (index, command) in &newly_committed {
            self.on_commit(&mut st, *index, command);
        }
        self.persist_state(&st, "after appendEntries");
        if st.role != prev_role {
            self.emit_state(&st);
        }
        if st.commit_index != prev_commit {
            self.commit_tx.send_replace(st.commit_index);
        }
        drop(st);

        let stale = !reply.success && reply.term > args.term;
        if !stale {
            *self.last_heartbeat.write().await = Instant::now();
        }
        reply
    }

    /// InstallSnapshot RPC entry point: applies the complete image,
    /// discards the covered log prefix and advances the commit boundary.
    pub async fn install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        if !self.is_started() {
            return InstallSnapshotReply { success: false };
        }
        tracing::debug!(
            term = args.term,
            last_included_index = args.snapshot.last_included_index,
            last_included_term = args.snapshot.last_included_term,
            "got InstallSnapshot request"
        );
        let mut st = self.state.write().await;
        if args.term < st.current_term {
            tracing::debug!(term = args.term, "rejecting snapshot from stale term");
            return InstallSnapshotReply { success: false };
        }
        st.current_term = args.term;

        self.applier.restore_from_snapshot(&args.snapshot);
        snapshot::discard_log(&mut st, &args.snapshot);
        if args.snapshot.last_included_index > st.commit_index {
            st.commit_index = args.snapshot.last_included_index;
        }
        if args.snapshot.last_included_index > st.last_applied {
            st.last_applied = args.snapshot.last_included_index;
        }
        st.last_snapshot = Some(args.snapshot);
        self.persist_state_and_snapshot(&st);
        self.commit_tx.send_replace(st.commit_index);
        drop(st);

        *self.last_heartbeat.write().await = Instant::now();
        tracing::debug!("snapshot installed");
        InstallSnapshotReply { success: true }
    }

    /// Mark this instance into service and every other peer out of
    /// service: only one instance ever receives external traffic.
    pub async fn take_into_service(&self) -> Result<()> {
        let Some(membership) = self.membership.get() else {
            return Ok(());
        };
        for (server, peer) in membership.peers.iter().enumerate() {
            if server == membership.me {
                peer.take_into_service().await?;
            } else {
                peer.take_out_of_service().await?;
            }
        }
        Ok(())
    }

    pub async fn take_out_of_service(&self) -> Result<()> {
        if let Some(peer) = self.my_peer() {
            peer.take_out_of_service().await?;
        }
        Ok(())
    }

    /// Role summary for the redirect middleware and the status API.
    pub async fn status(&self) -> RaftStateSummary {
        let st = self.state.read().await;
        let leader_base_url = if self.is_started() && st.role == RaftRole::Follower {
            let leader = st.leader_id;
            self.membership.get().and_then(|m| {
                if leader >= 0 && (leader as usize) < m.peers.len() {
                    Some(m.peers[leader as usize].base_address())
                } else {
                    None
                }
            })
        } else {
            None
        };
        RaftStateSummary {
            started: self.is_started(),
            state: st.role,
            leader_base_url,
            term: st.current_term,
            commit_index: st.commit_index,
            last_applied: st.last_applied,
            log_length: st.len(),
            start_index: st.start_index,
        }
    }

    fn persist_state(&self, st: &RaftState, site: &str) {
        tracing::trace!(site, "save persistent state");
        match serde_json::to_string(&PersistedState::from_state(st)) {
            Ok(doc) => self.persister.save_state(&doc),
            Err(e) => tracing::warn!(error = %e, "unable to encode raft state"),
        }
    }

    fn persist_state_and_snapshot(&self, st: &RaftState) {
        let state_doc = match serde_json::to_string(&PersistedState::from_state(st)) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "unable to encode raft state");
                return;
            }
        };
        let Some(snapshot) = st.last_snapshot.as_ref() else {
            self.persister.save_state(&state_doc);
            return;
        };
        match serde_json::to_string(snapshot) {
            Ok(snapshot_doc) => self
                .persister
                .save_state_and_snapshot(&state_doc, &snapshot_doc),
            Err(e) => {
                tracing::warn!(error = %e, "unable to encode snapshot");
                self.persister.save_state(&state_doc);
            }
        }
    }
}
