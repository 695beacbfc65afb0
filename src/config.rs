use std::net::SocketAddr;
use std::path::PathBuf;

/// Lower bound of the randomized election timeout in milliseconds.
pub const MIN_ELECTION_TIMEOUT_MS: u64 = 1000;
/// Upper bound (exclusive) of the randomized election timeout in milliseconds.
pub const MAX_ELECTION_TIMEOUT_MS: u64 = 2000;

/// Persistence settings for raft state and snapshots.
///
/// When disabled the node runs purely in memory and loses its log on
/// restart (it will catch up from the leader via snapshot install).
#[derive(Debug, Clone, Default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory holding `raft.data` and `snapshot.data`.
    pub data_dir: Option<PathBuf>,
}

impl PersistenceConfig {
    pub fn state_file(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("raft.data"))
    }

    pub fn snapshot_file(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("snapshot.data"))
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identity of this instance within the service registry.
    pub instance_id: String,
    /// Gateway HTTP address (status API, redirect target for followers).
    pub listen_addr: SocketAddr,
    /// Raft RPC channel listener address.
    pub raft_addr: SocketAddr,
    /// Whether this instance serves HTTPS (affects redirect base addresses).
    pub secure: bool,
    /// The other cluster members, fixed for the lifetime of a run.
    pub peers: Vec<PeerConfig>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Minimum number of instances before consensus participation begins.
    pub min_cluster_size: usize,
    /// Live log entries above this trigger compaction on the leader.
    pub max_log_size: i64,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub instance_id: String,
    pub host: String,
    /// Gateway HTTP port, used for leader redirects.
    pub port: u16,
    /// Raft RPC channel port.
    pub raft_port: u16,
    pub secure: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8544"
                .parse()
                .expect("default listen address is valid"),
            raft_addr: "127.0.0.1:8545"
                .parse()
                .expect("default raft address is valid"),
            secure: false,
            peers: Vec::new(),
            election_timeout_min_ms: MIN_ELECTION_TIMEOUT_MS,
            election_timeout_max_ms: MAX_ELECTION_TIMEOUT_MS,
            heartbeat_interval_ms: (MIN_ELECTION_TIMEOUT_MS as f64 * 0.75) as u64,
            min_cluster_size: 3,
            max_log_size: 100,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(instance_id: impl Into<String>, listen_addr: SocketAddr, raft_addr: SocketAddr) -> Self {
        Self {
            instance_id: instance_id.into(),
            listen_addr,
            raft_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, peer: PeerConfig) -> Self {
        self.peers.push(peer);
        self
    }
}
