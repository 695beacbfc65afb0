use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::raft::invoke::{RaftCall, RaftInvoker, RaftReply};
use crate::transport::{Envelope, RpcMessage};

/// Accept peer RPC channels and dispatch calls through the invoker seam.
pub async fn serve_raft_rpc(
    listener: TcpListener,
    invoker: Arc<dyn RaftInvoker>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    tracing::debug!(peer = %peer_addr, "raft channel connected");
                    let invoker = invoker.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = handle_channel(stream, invoker) => {}
                        }
                        tracing::debug!(peer = %peer_addr, "raft channel closed");
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept raft channel");
                }
            }
        }
    }
}

async fn handle_channel(stream: TcpStream, invoker: Arc<dyn RaftInvoker>) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let envelope: Envelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(_) => {
                tracing::warn!("ignore invalid message");
                continue;
            }
        };
        let call = match envelope.body {
            RpcMessage::RequestVoteArgs(args) => RaftCall::RequestVote(args),
            RpcMessage::AppendEntriesArgs(args) => RaftCall::AppendEntries(args),
            RpcMessage::InstallSnapshotArgs(args) => RaftCall::InstallSnapshot(args),
            other => {
                tracing::warn!(kind = other.kind(), "unexpected message kind on raft channel");
                continue;
            }
        };
        let reply = match invoker.invoke(call).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "raft invocation failed");
                continue;
            }
        };
        let body = match reply {
            RaftReply::RequestVote(reply) => RpcMessage::RequestVoteReply(reply),
            RaftReply::AppendEntries(reply) => RpcMessage::AppendEntriesReply(reply),
            RaftReply::InstallSnapshot(reply) => RpcMessage::InstallSnapshotReply(reply),
        };
        let data = match serde_json::to_vec(&Envelope {
            seq: envelope.seq,
            body,
        }) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "unable to encode rpc reply");
                continue;
            }
        };
        if framed.send(data.into()).await.is_err() {
            break;
        }
    }
}
