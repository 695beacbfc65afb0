use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use portico::config::{NodeConfig, PeerConfig, PersistenceConfig};
use portico::node::GatewayNode;
use portico::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "portico")]
#[command(version)]
#[command(about = "A plugin-gateway application-server cluster with Raft consensus")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a gateway node
    Server(ServerArgs),

    /// Query a node's cluster status
    Status {
        /// Base URL of the node's status server
        #[arg(long, default_value = "http://127.0.0.1:8544")]
        addr: String,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Unique instance id within the cluster (random when omitted)
    #[arg(long)]
    instance_id: Option<String>,

    /// Gateway HTTP listen address
    #[arg(long, default_value = "127.0.0.1:8544")]
    listen: SocketAddr,

    /// Raft RPC listen address
    #[arg(long, default_value = "127.0.0.1:8545")]
    raft_listen: SocketAddr,

    /// Peer instance as instance-id@host:port:raft-port (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<PeerConfig>,

    /// Lower bound of the randomized election timeout
    #[arg(long, default_value_t = 1000)]
    election_timeout_min_ms: u64,

    /// Upper bound (exclusive) of the randomized election timeout
    #[arg(long, default_value_t = 2000)]
    election_timeout_max_ms: u64,

    /// Heartbeat interval; defaults to 0.75 x the minimum election timeout
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Minimum number of instances before consensus participation begins
    #[arg(long, default_value_t = 3)]
    min_cluster_size: usize,

    /// Live log entries above this trigger compaction on the leader
    #[arg(long, default_value_t = 100)]
    max_log_size: i64,

    /// Enable raft state and snapshot persistence
    #[arg(long)]
    persist: bool,

    /// Directory for raft.data and snapshot.data
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Advertise HTTPS base addresses for redirects
    #[arg(long)]
    secure: bool,
}

fn parse_peer(value: &str) -> Result<PeerConfig, String> {
    let (instance_id, rest) = value
        .split_once('@')
        .ok_or_else(|| format!("invalid peer '{}', expected instance-id@host:port:raft-port", value))?;
    let mut parts = rest.rsplitn(3, ':');
    let raft_port = parts
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| format!("invalid raft port in peer '{}'", value))?;
    let port = parts
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| format!("invalid port in peer '{}'", value))?;
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| format!("missing host in peer '{}'", value))?;
    Ok(PeerConfig {
        instance_id: instance_id.to_string(),
        host: host.to_string(),
        port,
        raft_port,
        secure: false,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Server(server) => run_server(server).await,
        Commands::Status { addr } => run_status(&addr).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = NodeConfig::new(
        args.instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        args.listen,
        args.raft_listen,
    );
    config.secure = args.secure;
    config.peers = args.peers;
    config.election_timeout_min_ms = args.election_timeout_min_ms;
    config.election_timeout_max_ms = args.election_timeout_max_ms;
    config.heartbeat_interval_ms = args
        .heartbeat_interval_ms
        .unwrap_or((args.election_timeout_min_ms as f64 * 0.75) as u64);
    config.min_cluster_size = args.min_cluster_size;
    config.max_log_size = args.max_log_size;
    config.persistence = PersistenceConfig {
        enabled: args.persist,
        data_dir: args.data_dir,
    };

    let node = GatewayNode::new(config);
    let shutdown = install_shutdown_handler();
    node.run(shutdown).await?;
    Ok(())
}

async fn run_status(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/api/cluster", addr.trim_end_matches('/'));
    let status: serde_json::Value = reqwest::get(&url).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
