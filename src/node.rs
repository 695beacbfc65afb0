//! Composition root: wires the registry, raft core, sync service, RPC
//! listener and status server together for one gateway instance.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::admin::{run_admin, AdminState};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::raft::invoke::DirectInvoker;
use crate::raft::persist::make_persister;
use crate::raft::RaftNode;
use crate::registry::StaticRegistryClient;
use crate::sync::{StateApplier, SyncPublisher, SyncService};
use crate::transport::serve_raft_rpc;

pub struct GatewayNode {
    pub config: NodeConfig,
    pub raft: Arc<RaftNode>,
    pub applier: Arc<StateApplier>,
    pub publisher: SyncPublisher,
    pub registry: Arc<StaticRegistryClient>,
}

impl GatewayNode {
    pub fn new(config: NodeConfig) -> Self {
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
        Self {
            config,
            raft,
            applier,
            publisher,
            registry,
        }
    }

    /// Run all subsystems until the cancellation token fires:
    ///
    /// 1. the raft RPC channel listener,
    /// 2. the consensus loop (discovery, elections, replication),
    /// 3. the sync service coupling leadership to the registry,
    /// 4. the gateway status server (blocking).
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.raft_addr).await?;
        tracing::info!(addr = %self.config.raft_addr, "raft channel listener bound");
        let invoker = Arc::new(DirectInvoker::new(self.raft.clone()));
        tokio::spawn(serve_raft_rpc(listener, invoker, cancel.clone()));

        let raft = self.raft.clone();
        let raft_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = raft.start().await {
                tracing::error!(error = %e, "raft bootstrap failed");
                return;
            }
            raft.run(raft_cancel).await;
        });

        let sync_service = SyncService::new(self.raft.clone(), self.publisher.clone());
        tokio::spawn(sync_service.run(cancel.clone()));

        run_admin(
            self.config.listen_addr,
            AdminState {
                raft: self.raft.clone(),
                applier: self.applier.clone(),
            },
            cancel,
        )
        .await;
        Ok(())
    }
}
