//! Raft RPC transport: one persistent, full-duplex channel per peer.
//!
//! Frames are length-delimited; each frame carries a JSON envelope
//! `{ seq, type, message }`. Sequence numbers correlate replies with
//! pending calls. The transport imposes no per-call timeout — the
//! caller's heartbeat/election cadence is the retry mechanism.

mod client;
mod server;

pub use client::RpcDriver;
pub use server::serve_raft_rpc;

use serde::{Deserialize, Serialize};

use crate::raft::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply,
    RequestVoteArgs, RequestVoteReply,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum RpcMessage {
    RequestVoteArgs(RequestVoteArgs),
    RequestVoteReply(RequestVoteReply),
    AppendEntriesArgs(AppendEntriesArgs),
    AppendEntriesReply(AppendEntriesReply),
    InstallSnapshotArgs(InstallSnapshotArgs),
    InstallSnapshotReply(InstallSnapshotReply),
}

impl RpcMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcMessage::RequestVoteArgs(_) => "RequestVoteArgs",
            RpcMessage::RequestVoteReply(_) => "RequestVoteReply",
            RpcMessage::AppendEntriesArgs(_) => "AppendEntriesArgs",
            RpcMessage::AppendEntriesReply(_) => "AppendEntriesReply",
            RpcMessage::InstallSnapshotArgs(_) => "InstallSnapshotArgs",
            RpcMessage::InstallSnapshotReply(_) => "InstallSnapshotReply",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub body: RpcMessage,
}
