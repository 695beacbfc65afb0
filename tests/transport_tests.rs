//! Transport tests: sequence-correlated request/reply over a persistent
//! channel, lazy connection, failure of pending calls on close, and the
//! invoker seam.

mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use portico::error::{GatewayError, Result};
use portico::raft::invoke::{
    serve_invocations, ChannelInvoker, DirectInvoker, RaftCall, RaftInvoker, RaftReply,
};
use portico::raft::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotReply, RequestVoteArgs, RequestVoteReply,
};
use portico::transport::{serve_raft_rpc, RpcDriver};

/// Invoker stub that derives its reply from the request, making reply
/// correlation observable.
struct EchoInvoker;

#[async_trait]
impl RaftInvoker for EchoInvoker {
    async fn invoke(&self, call: RaftCall) -> Result<RaftReply> {
        match call {
            RaftCall::RequestVote(args) => Ok(RaftReply::RequestVote(RequestVoteReply {
                term: args.term,
                vote_granted: args.term % 2 == 0,
            })),
            RaftCall::AppendEntries(args) => Ok(RaftReply::AppendEntries(AppendEntriesReply {
                term: args.term,
                success: true,
                conflict: None,
            })),
            RaftCall::InstallSnapshot(_) => {
                Ok(RaftReply::InstallSnapshot(InstallSnapshotReply {
                    success: true,
                }))
            }
        }
    }
}

async fn echo_server() -> (u16, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    tokio::spawn(serve_raft_rpc(listener, Arc::new(EchoInvoker), cancel.clone()));
    (port, cancel)
}

fn vote_args(term: i64) -> RequestVoteArgs {
    RequestVoteArgs {
        term,
        candidate_id: 0,
        last_log_index: -1,
        last_log_term: -1,
    }
}

/// Concurrent calls on one channel resolve to their own replies.
#[tokio::test]
async fn concurrent_calls_are_seq_correlated() {
    let (port, _cancel) = echo_server().await;
    let driver = Arc::new(RpcDriver::new("127.0.0.1", port));

    let mut handles = Vec::new();
    for term in 0..20i64 {
        let driver = driver.clone();
        handles.push(tokio::spawn(async move {
            let reply = driver.send_request_vote(vote_args(term)).await.unwrap();
            (term, reply)
        }));
    }
    for handle in handles {
        let (term, reply) = handle.await.unwrap();
        assert_eq!(reply.term, term);
        assert_eq!(reply.vote_granted, term % 2 == 0);
    }
}

/// All three RPC kinds travel over the same channel.
#[tokio::test]
async fn all_rpc_kinds_share_one_channel() {
    let (port, _cancel) = echo_server().await;
    let driver = RpcDriver::new("127.0.0.1", port);

    let vote = driver.send_request_vote(vote_args(2)).await.unwrap();
    assert!(vote.vote_granted);

    let append = driver
        .send_append_entries(AppendEntriesArgs {
            term: 5,
            leader_id: 0,
            prev_log_index: -1,
            prev_log_term: -1,
            entries: Vec::new(),
            leader_commit: -1,
        })
        .await
        .unwrap();
    assert!(append.success);
    assert_eq!(append.term, 5);
}

/// A call to an unreachable peer fails with a transport error rather than
/// hanging; the next cycle simply retries.
#[tokio::test]
async fn unreachable_peer_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let driver = RpcDriver::new("127.0.0.1", port);
    let result = driver.send_request_vote(vote_args(1)).await;
    assert!(result.is_err());
}

/// When the channel closes, pending calls fail with "connection closed".
#[tokio::test]
async fn pending_calls_fail_on_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Server that accepts but never replies
    let server = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let driver = Arc::new(RpcDriver::new("127.0.0.1", port));
    let pending = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.send_request_vote(vote_args(1)).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Dropping the server's socket closes the channel
    server.abort();

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("pending call should resolve")
        .unwrap();
    match result {
        Err(GatewayError::ConnectionClosed) => {}
        other => panic!("expected connection closed, got {:?}", other),
    }
}

/// The channel invoker produces the same replies as the direct invoker.
#[tokio::test]
async fn channel_invoker_matches_direct_invoker() {
    use portico::raft::persist::NoopPersister;
    use portico::raft::RaftNode;
    use portico::registry::StaticRegistryClient;
    use portico::sync::StateApplier;

    // Bootstrapped raft core without the timer loop, so no election can
    // change the term between the two invocations.
    let config = test_harness::test_node_config(0, 3, 18500);
    let registry = Arc::new(StaticRegistryClient::from_config(&config));
    let raft = RaftNode::new(
        config,
        Arc::new(StateApplier::new()),
        Box::new(NoopPersister),
        registry,
    );
    raft.start().await.unwrap();

    let direct = DirectInvoker::new(raft.clone());
    let (channel, rx) = ChannelInvoker::new(16);
    tokio::spawn(serve_invocations(raft.clone(), rx));

    let args = vote_args(100);
    let direct_reply = match direct.invoke(RaftCall::RequestVote(args.clone())).await.unwrap() {
        RaftReply::RequestVote(reply) => reply,
        other => panic!("unexpected reply: {:?}", other),
    };
    let channel_reply = match channel.invoke(RaftCall::RequestVote(args)).await.unwrap() {
        RaftReply::RequestVote(reply) => reply,
        other => panic!("unexpected reply: {:?}", other),
    };
    assert_eq!(direct_reply.term, channel_reply.term);
    assert_eq!(direct_reply.vote_granted, channel_reply.vote_granted);
}
