use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{GatewayError, Result};
use crate::raft::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply,
    RequestVoteArgs, RequestVoteReply,
};
use crate::transport::{Envelope, RpcMessage};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<RpcMessage>>>>;

/// Client side of the per-peer RPC channel.
///
/// The connection is established lazily on first use; callers racing an
/// in-flight connect share the attempt (they queue on the connection
/// lock). When the channel closes, every pending call fails with a
/// connection-closed error and the pending map is cleared.
pub struct RpcDriver {
    pub address: String,
    seq: AtomicU64,
    blocked: AtomicBool,
    conn: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: PendingMap,
}

impl RpcDriver {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            seq: AtomicU64::new(1),
            blocked: AtomicBool::new(false),
            conn: Mutex::new(None),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub async fn send_request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        match self.call(RpcMessage::RequestVoteArgs(args)).await? {
            RpcMessage::RequestVoteReply(reply) => Ok(reply),
            other => Err(GatewayError::UnexpectedReply {
                expected: "RequestVoteReply",
                got: other.kind(),
            }),
        }
    }

    pub async fn send_append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
        match self.call(RpcMessage::AppendEntriesArgs(args)).await? {
            RpcMessage::AppendEntriesReply(reply) => Ok(reply),
            other => Err(GatewayError::UnexpectedReply {
                expected: "AppendEntriesReply",
                got: other.kind(),
            }),
        }
    }

    pub async fn send_install_snapshot(
        &self,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply> {
        match self.call(RpcMessage::InstallSnapshotArgs(args)).await? {
            RpcMessage::InstallSnapshotReply(reply) => Ok(reply),
            other => Err(GatewayError::UnexpectedReply {
                expected: "InstallSnapshotReply",
                got: other.kind(),
            }),
        }
    }

    /// Simulate a network partition for tests: while blocked, calls fail
    /// immediately and the current channel is dropped.
    pub async fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Relaxed);
        if blocked {
            *self.conn.lock().await = None;
        }
    }

    async fn call(&self, body: RpcMessage) -> Result<RpcMessage> {
        if self.blocked.load(Ordering::Relaxed) {
            return Err(GatewayError::ConnectionClosed);
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(seq, reply_tx);

        let sender = match self.sender().await {
            Ok(sender) => sender,
            Err(e) => {
                self.pending.lock().unwrap().remove(&seq);
                return Err(e);
            }
        };
        tracing::trace!(seq, address = %self.address, "send rpc message");
        if sender.send(Envelope { seq, body }).await.is_err() {
            self.pending.lock().unwrap().remove(&seq);
            return Err(GatewayError::ConnectionClosed);
        }

        reply_rx.await.map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Returns the write handle of the live channel, connecting first if
    /// necessary. Holding `conn` across the connect makes concurrent
    /// callers share a single attempt.
    async fn sender(&self) -> Result<mpsc::Sender<Envelope>> {
        let mut conn = self.conn.lock().await;
        if let Some(tx) = conn.as_ref() {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let stream = TcpStream::connect(&self.address).await?;
        tracing::info!(address = %self.address, "connection established");
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut sink, mut read) = framed.split();
        let (tx, mut rx) = mpsc::channel::<Envelope>(64);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let data = match serde_json::to_vec(&envelope) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(error = %e, "unable to encode rpc message");
                        continue;
                    }
                };
                if sink.send(data.into()).await.is_err() {
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let address = self.address.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
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
                let waiter = pending.lock().unwrap().remove(&envelope.seq);
                match waiter {
                    Some(reply_tx) => {
                        let _ = reply_tx.send(envelope.body);
                    }
                    None => {
                        tracing::warn!(seq = envelope.seq, "no request found with seq, ignore it");
                    }
                }
            }
            tracing::debug!(address = %address, "connection closed");
            // Dropping the waiters fails every pending call
            pending.lock().unwrap().clear();
        });

        *conn = Some(tx.clone());
        Ok(tx)
    }
}
