//! Invocation seam between the RPC endpoint and the raft core.
//!
//! When the gateway runs several cooperating worker processes, only one
//! designated worker hosts consensus; the others proxy raft-affecting
//! calls to it. The endpoint depends only on `RaftInvoker`, never on
//! which implementation is active.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{GatewayError, Result};
use crate::raft::node::RaftNode;
use crate::raft::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply,
    RequestVoteArgs, RequestVoteReply,
};

#[derive(Debug)]
pub enum RaftCall {
    RequestVote(RequestVoteArgs),
    AppendEntries(AppendEntriesArgs),
    InstallSnapshot(InstallSnapshotArgs),
}

#[derive(Debug)]
pub enum RaftReply {
    RequestVote(RequestVoteReply),
    AppendEntries(AppendEntriesReply),
    InstallSnapshot(InstallSnapshotReply),
}

#[async_trait]
pub trait RaftInvoker: Send + Sync {
    async fn invoke(&self, call: RaftCall) -> Result<RaftReply>;
}

/// Calls the raft core in this process.
pub struct DirectInvoker {
    raft: Arc<RaftNode>,
}

impl DirectInvoker {
    pub fn new(raft: Arc<RaftNode>) -> Self {
        Self { raft }
    }
}

#[async_trait]
impl RaftInvoker for DirectInvoker {
    async fn invoke(&self, call: RaftCall) -> Result<RaftReply> {
        Ok(dispatch(&self.raft, call).await)
    }
}

type InvocationRequest = (RaftCall, oneshot::Sender<RaftReply>);

/// Serializes calls over a channel to the consensus-hosting task.
#[derive(Clone)]
pub struct ChannelInvoker {
    tx: mpsc::Sender<InvocationRequest>,
}

impl ChannelInvoker {
    /// Returns the invoker handle plus the receiving end to pass to
    /// `serve_invocations` on the hosting side.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InvocationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RaftInvoker for ChannelInvoker {
    async fn invoke(&self, call: RaftCall) -> Result<RaftReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((call, reply_tx))
            .await
            .map_err(|_| GatewayError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| GatewayError::ConnectionClosed)
    }
}

/// Drain invocation requests on the consensus-hosting side.
pub async fn serve_invocations(raft: Arc<RaftNode>, mut rx: mpsc::Receiver<InvocationRequest>) {
    while let Some((call, reply_tx)) = rx.recv().await {
        let reply = dispatch(&raft, call).await;
        let _ = reply_tx.send(reply);
    }
}

async fn dispatch(raft: &Arc<RaftNode>, call: RaftCall) -> RaftReply {
    match call {
        RaftCall::RequestVote(args) => RaftReply::RequestVote(raft.request_vote(args).await),
        RaftCall::AppendEntries(args) => RaftReply::AppendEntries(raft.append_entries(args).await),
        RaftCall::InstallSnapshot(args) => {
            RaftReply::InstallSnapshot(raft.install_snapshot(args).await)
        }
    }
}
