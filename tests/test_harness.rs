//! Test harness for multi-node raft cluster integration tests.
//!
//! Spawns full gateway nodes (raft core, RPC listener, sync service) on
//! loopback ports with shortened timeouts, and provides wait helpers for
//! eventual assertions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use portico::config::{NodeConfig, PeerConfig, PersistenceConfig};
use portico::raft::invoke::DirectInvoker;
use portico::raft::persist::make_persister;
use portico::raft::{RaftNode, RaftRole};
use portico::registry::StaticRegistryClient;
use portico::sync::{StateApplier, SyncPublisher, SyncService};
use portico::transport::serve_raft_rpc;

/// Per-cluster tuning knobs.
#[derive(Clone)]
pub struct ClusterOptions {
    pub max_log_size: i64,
    pub persistence: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_log_size: 100,
            persistence: false,
        }
    }
}

/// Node configuration with shorter timeouts for faster tests.
pub fn test_node_config(index: usize, num_nodes: usize, base_port: u16) -> NodeConfig {
    let mut config = NodeConfig::new(
        format!("node-{}", index + 1),
        format!("127.0.0.1:{}", base_port + 2 * index as u16)
            .parse()
            .unwrap(),
        format!("127.0.0.1:{}", base_port + 2 * index as u16 + 1)
            .parse()
            .unwrap(),
    );
    config.election_timeout_min_ms = 150;
    config.election_timeout_max_ms = 300;
    config.heartbeat_interval_ms = 50;
    config.min_cluster_size = num_nodes;
    for peer in 0..num_nodes {
        if peer == index {
            continue;
        }
        config = config.with_peer(PeerConfig {
            instance_id: format!("node-{}", peer + 1),
            host: "127.0.0.1".to_string(),
            port: base_port + 2 * peer as u16,
            raft_port: base_port + 2 * peer as u16 + 1,
            secure: false,
        });
    }
    config
}

/// Handle to a running test node.
pub struct TestNode {
    pub config: NodeConfig,
    pub raft: Arc<RaftNode>,
    pub applier: Arc<StateApplier>,
    pub publisher: SyncPublisher,
    pub registry: Arc<StaticRegistryClient>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub async fn start(config: NodeConfig) -> Self {
        let registry = Arc::new(StaticRegistryClient::from_config(&config));
        let applier = Arc::new(StateApplier::new());
        let persister = make_persister(&config.persistence);
        let raft = RaftNode::new(
            config.clone(),
            applier.clone(),
            persister,
            registry.clone(),
        );
        let publisher = SyncPublisher::new(applier.clone());
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let listener = bind_raft_listener(config.raft_addr).await;
        let invoker = Arc::new(DirectInvoker::new(raft.clone()));
        handles.push(tokio::spawn(serve_raft_rpc(
            listener,
            invoker,
            cancel.clone(),
        )));

        let raft_loop = raft.clone();
        let raft_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            raft_loop.start().await.expect("raft bootstrap");
            raft_loop.run(raft_cancel).await;
        }));

        let sync_service = SyncService::new(raft.clone(), publisher.clone());
        handles.push(tokio::spawn(sync_service.run(cancel.clone())));

        Self {
            config,
            raft,
            applier,
            publisher,
            registry,
            cancel,
            handles,
        }
    }

    pub async fn is_leader(&self) -> bool {
        self.raft.is_leader().await
    }

    pub async fn role(&self) -> RaftRole {
        self.raft.state.read().await.role
    }

    pub async fn current_term(&self) -> i64 {
        self.raft.state.read().await.current_term
    }

    pub async fn commit_index(&self) -> i64 {
        self.raft.state.read().await.commit_index
    }

    pub async fn last_applied(&self) -> i64 {
        self.raft.state.read().await.last_applied
    }

    /// Logical log length (compaction-aware).
    pub async fn log_len(&self) -> i64 {
        self.raft.state.read().await.len()
    }

    /// Number of live (uncompacted) entries.
    pub async fn live_log_len(&self) -> usize {
        self.raft.state.read().await.log.len()
    }

    pub async fn start_index(&self) -> i64 {
        self.raft.state.read().await.start_index
    }

    /// Block this node's outbound channel to peer `server`.
    pub async fn block_outbound_to(&self, server: usize, blocked: bool) {
        self.raft.peers()[server].rpc().set_blocked(blocked).await;
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Test cluster managing multiple nodes.
pub struct TestCluster {
    pub nodes: Vec<Option<TestNode>>,
    configs: Vec<NodeConfig>,
    #[allow(dead_code)]
    data_dirs: Vec<Option<tempfile::TempDir>>,
}

impl TestCluster {
    pub async fn new(num_nodes: usize, base_port: u16) -> Self {
        Self::with_options(num_nodes, base_port, ClusterOptions::default()).await
    }

    pub async fn with_options(num_nodes: usize, base_port: u16, options: ClusterOptions) -> Self {
        let mut configs = Vec::new();
        let mut data_dirs = Vec::new();
        for index in 0..num_nodes {
            let mut config = test_node_config(index, num_nodes, base_port);
            config.max_log_size = options.max_log_size;
            if options.persistence {
                let dir = tempfile::tempdir().expect("create data dir");
                config.persistence = PersistenceConfig {
                    enabled: true,
                    data_dir: Some(dir.path().to_path_buf()),
                };
                data_dirs.push(Some(dir));
            } else {
                data_dirs.push(None);
            }
            configs.push(config);
        }

        let mut nodes = Vec::new();
        for config in &configs {
            nodes.push(Some(TestNode::start(config.clone()).await));
        }
        Self {
            nodes,
            configs,
            data_dirs,
        }
    }

    pub fn node(&self, index: usize) -> &TestNode {
        self.nodes[index].as_ref().expect("node is running")
    }

    pub fn running_nodes(&self) -> impl Iterator<Item = (usize, &TestNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (i, n)))
    }

    /// Stop a node, simulating a crash.
    pub fn stop_node(&mut self, index: usize) {
        self.nodes[index] = None;
    }

    /// Restart a stopped node with its original configuration (and data
    /// directory, when persistence is enabled).
    pub async fn restart_node(&mut self, index: usize) {
        assert!(self.nodes[index].is_none(), "node must be stopped first");
        self.nodes[index] = Some(TestNode::start(self.configs[index].clone()).await);
    }

    /// Path to a node's data directory, when persistence is enabled.
    pub fn data_dir(&self, index: usize) -> Option<std::path::PathBuf> {
        self.data_dirs[index]
            .as_ref()
            .map(|d| d.path().to_path_buf())
    }

    pub async fn count_leaders(&self) -> usize {
        let mut count = 0;
        for (_, node) in self.running_nodes() {
            if node.is_leader().await {
                count += 1;
            }
        }
        count
    }

    pub async fn leader_index(&self) -> Option<usize> {
        for (index, node) in self.running_nodes() {
            if node.is_leader().await {
                return Some(index);
            }
        }
        None
    }

    /// Wait until exactly one node reports leadership.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let found = wait_for(
            || async { self.leader_index().await.is_some() },
            timeout,
            Duration::from_millis(25),
        )
        .await;
        if found {
            self.leader_index().await
        } else {
            None
        }
    }

    /// Wait for a leader that is not `excluded`.
    pub async fn wait_for_new_leader(&self, excluded: usize, timeout: Duration) -> Option<usize> {
        let found = wait_for(
            || async {
                matches!(self.leader_index().await, Some(index) if index != excluded)
            },
            timeout,
            Duration::from_millis(25),
        )
        .await;
        if found {
            self.leader_index().await
        } else {
            None
        }
    }

    /// Isolate a node: block its outbound channels and every other node's
    /// channel toward it.
    pub async fn isolate_node(&self, index: usize) {
        self.set_isolation(index, true).await;
    }

    pub async fn heal_node(&self, index: usize) {
        self.set_isolation(index, false).await;
    }

    async fn set_isolation(&self, index: usize, blocked: bool) {
        for (i, node) in self.running_nodes() {
            if i == index {
                for peer in 0..self.configs.len() {
                    if peer != index {
                        node.block_outbound_to(peer, blocked).await;
                    }
                }
            } else {
                node.block_outbound_to(index, blocked).await;
            }
        }
    }

    /// All running nodes hold identical logs (same logical length, same
    /// term at every index).
    pub async fn logs_consistent(&self) -> bool {
        let mut reference: Option<(i64, Vec<(i64, i64)>)> = None;
        for (_, node) in self.running_nodes() {
            let st = node.raft.state.read().await;
            let entries: Vec<(i64, i64)> = (st.start_index..st.len())
                .map(|i| (i, st.item(i).map(|e| e.term).unwrap_or(-1)))
                .collect();
            match &reference {
                None => reference = Some((st.len(), entries)),
                Some((len, reference_entries)) => {
                    if st.len() != *len {
                        return false;
                    }
                    for (index, term) in &entries {
                        if let Some((_, reference_term)) =
                            reference_entries.iter().find(|(i, _)| i == index)
                        {
                            if term != reference_term {
                                return false;
                            }
                        }
                    }
                }
            }
        }
        true
    }
}

/// Bind a raft RPC listener, retrying briefly on `AddrInUse`.
///
/// When a stopped node is restarted on the same port, its previous listener
/// task has been cancelled/aborted but may not have been reaped by the runtime
/// yet, so the socket can still be held for a few scheduler ticks. Retrying
/// with `SO_REUSEADDR` set lets the restart rebind reliably once the old
/// socket is released.
async fn bind_raft_listener(addr: std::net::SocketAddr) -> tokio::net::TcpListener {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let socket = tokio::net::TcpSocket::new_v4().expect("create raft socket");
        socket.set_reuseaddr(true).expect("set reuseaddr");
        match socket.bind(addr).and_then(|()| socket.listen(1024)) {
            Ok(listener) => return listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse
                && tokio::time::Instant::now() < deadline =>
            {
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("bind raft listener: {:?}", e),
        }
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout, Duration::from_millis(25)).await;
    assert!(result, "{}", message);
}
