//! Service-registry / peer-discovery collaborator.
//!
//! The real API-mediation-layer client lives outside this crate; consensus
//! code depends only on the `RegistryClient` trait. The static
//! implementation answers discovery from the boot configuration and keeps
//! in/out-of-service marks in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::NodeConfig;
use crate::error::Result;

/// A discovered cluster member.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub host: String,
    /// Gateway HTTP port, used for leader redirects.
    pub port: u16,
    /// Raft RPC channel port.
    pub raft_port: u16,
    pub secure: bool,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn instance_id(&self) -> String;

    /// Block until the cluster has at least `expected_size` members, then
    /// return them. The order is identical on every node; peer ids are
    /// indices into this list.
    async fn wait_until_cluster_ready(&self, expected_size: usize) -> Result<Vec<InstanceInfo>>;

    /// Mark this instance as eligible for external traffic.
    async fn take_into_service(&self) -> Result<()>;

    /// Mark an instance as ineligible for external traffic.
    async fn take_instance_out_of_service(&self, instance_id: &str) -> Result<()>;

    /// Notifies when the registry forced a re-registration of this
    /// instance (which resets its service state).
    fn subscribe_reregistration(&self) -> broadcast::Receiver<()>;
}

/// Registry client backed by the static peer list from configuration.
pub struct StaticRegistryClient {
    me: InstanceInfo,
    members: Vec<InstanceInfo>,
    service_state: Mutex<HashMap<String, bool>>,
    reregister_tx: broadcast::Sender<()>,
}

impl StaticRegistryClient {
    pub fn from_config(config: &NodeConfig) -> Self {
        let me = InstanceInfo {
            instance_id: config.instance_id.clone(),
            host: config.listen_addr.ip().to_string(),
            port: config.listen_addr.port(),
            raft_port: config.raft_addr.port(),
            secure: config.secure,
        };
        let mut members: Vec<InstanceInfo> = config
            .peers
            .iter()
            .map(|p| InstanceInfo {
                instance_id: p.instance_id.clone(),
                host: p.host.clone(),
                port: p.port,
                raft_port: p.raft_port,
                secure: p.secure,
            })
            .chain(std::iter::once(me.clone()))
            .collect();
        // Every node must see the members in the same order
        members.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        members.dedup_by(|a, b| a.instance_id == b.instance_id);

        let (reregister_tx, _) = broadcast::channel(4);
        Self {
            me,
            members,
            service_state: Mutex::new(HashMap::new()),
            reregister_tx,
        }
    }

    /// Current service mark for an instance, if one was recorded.
    pub fn in_service(&self, instance_id: &str) -> Option<bool> {
        self.service_state
            .lock()
            .unwrap()
            .get(instance_id)
            .copied()
    }

    /// Simulate a forced re-registration notification.
    pub fn trigger_reregistration(&self) {
        let _ = self.reregister_tx.send(());
    }
}

#[async_trait]
impl RegistryClient for StaticRegistryClient {
    fn instance_id(&self) -> String {
        self.me.instance_id.clone()
    }

    async fn wait_until_cluster_ready(&self, expected_size: usize) -> Result<Vec<InstanceInfo>> {
        if self.members.len() < expected_size {
            tracing::warn!(
                members = self.members.len(),
                expected = expected_size,
                "configured cluster smaller than expected minimum"
            );
        }
        Ok(self.members.clone())
    }

    async fn take_into_service(&self) -> Result<()> {
        tracing::info!(instance = %self.me.instance_id, "taking instance into service");
        self.service_state
            .lock()
            .unwrap()
            .insert(self.me.instance_id.clone(), true);
        Ok(())
    }

    async fn take_instance_out_of_service(&self, instance_id: &str) -> Result<()> {
        tracing::info!(instance = %instance_id, "taking instance out of service");
        self.service_state
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), false);
        Ok(())
    }

    fn subscribe_reregistration(&self) -> broadcast::Receiver<()> {
        self.reregister_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;

    fn config() -> NodeConfig {
        NodeConfig::new(
            "i-b",
            "127.0.0.1:8544".parse().unwrap(),
            "127.0.0.1:8545".parse().unwrap(),
        )
        .with_peer(PeerConfig {
            instance_id: "i-c".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8546,
            raft_port: 8547,
            secure: false,
        })
        .with_peer(PeerConfig {
            instance_id: "i-a".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8548,
            raft_port: 8549,
            secure: false,
        })
    }

    #[tokio::test]
    async fn discovery_order_is_deterministic() {
        let registry = StaticRegistryClient::from_config(&config());
        let members = registry.wait_until_cluster_ready(3).await.unwrap();
        let ids: Vec<&str> = members.iter().map(|m| m.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["i-a", "i-b", "i-c"]);
    }

    #[tokio::test]
    async fn service_marks_are_recorded() {
        let registry = StaticRegistryClient::from_config(&config());
        assert_eq!(registry.in_service("i-b"), None);

        registry.take_into_service().await.unwrap();
        assert_eq!(registry.in_service("i-b"), Some(true));

        registry.take_instance_out_of_service("i-c").await.unwrap();
        assert_eq!(registry.in_service("i-c"), Some(false));
    }

    #[tokio::test]
    async fn reregistration_notifies_subscribers() {
        let registry = StaticRegistryClient::from_config(&config());
        let mut rx = registry.subscribe_reregistration();
        registry.trigger_reregistration();
        assert!(rx.recv().await.is_ok());
    }
}
