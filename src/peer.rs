//! A cluster peer: an RPC endpoint plus the capability to mark itself
//! into or out of service in the registry. Immutable for the lifetime of
//! a run — the membership is fixed at boot.

use std::sync::Arc;

use crate::error::Result;
use crate::registry::{InstanceInfo, RegistryClient};
use crate::transport::RpcDriver;

pub struct Peer {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    rpc: RpcDriver,
    registry: Arc<dyn RegistryClient>,
}

impl Peer {
    pub fn from_instance(info: &InstanceInfo, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            instance_id: info.instance_id.clone(),
            host: info.host.clone(),
            port: info.port,
            secure: info.secure,
            rpc: RpcDriver::new(&info.host, info.raft_port),
            registry,
        }
    }

    /// Base URL of this peer's gateway surface, for leader redirects.
    pub fn base_address(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn rpc(&self) -> &RpcDriver {
        &self.rpc
    }

    /// Mark this peer eligible for external traffic. Only ever called on
    /// the leader's own peer entry.
    pub async fn take_into_service(&self) -> Result<()> {
        self.registry.take_into_service().await
    }

    pub async fn take_out_of_service(&self) -> Result<()> {
        self.registry
            .take_instance_out_of_service(&self.instance_id)
            .await
    }
}
