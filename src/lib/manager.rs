use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::client::{DoksClient, NodePoolService};
use crate::error::CloudProviderError;
use crate::node_group::{to_provider_id, NodeGroup};

/// Adapter configuration, loaded once at startup and immutable after.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Id of the cluster this autoscaler runs against.
    pub cluster_id: String,
    /// Access token for the remote API.
    pub token: String,
    /// API base URL override. Defaults to the public endpoint.
    pub url: Option<String>,
    /// Version tag folded into the user-agent string.
    pub version: Option<String>,
}

#[derive(Default)]
struct CacheSnapshot {
    /// Current set of node groups, keyed by pool id.
    node_groups: HashMap<String, Arc<NodeGroup>>,
    /// Node provider id to owning pool id. Every value here is a key in
    /// `node_groups`; both maps come out of the same listing pass.
    node_to_group: HashMap<String, String>,
}

/// Owns the remote client and the node-group cache.
///
/// The cache holds only group identities; sizes and member lists are
/// fetched live by the handles. Each refresh replaces the whole
/// snapshot, so concurrent readers see either the previous generation
/// or the new one, never a partially rebuilt cache.
pub struct Manager {
    client: Arc<dyn NodePoolService>,
    cluster_id: String,
    cache: RwLock<Arc<CacheSnapshot>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("cluster_id", &self.cluster_id)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Builds the authenticated API client from `config` and performs
    /// an initial refresh, so a manager is never observable with an
    /// empty cache. Fails on invalid configuration or an unreachable
    /// API.
    pub async fn new(config: &Config) -> Result<Self, CloudProviderError> {
        if config.token.is_empty() {
            return Err(CloudProviderError::Config(
                "access token is not provided".to_string(),
            ));
        }
        if config.cluster_id.is_empty() {
            return Err(CloudProviderError::Config(
                "cluster ID is not provided".to_string(),
            ));
        }
        let client = DoksClient::new(
            &config.token,
            config.url.as_deref(),
            config.version.as_deref(),
        )?;
        Self::with_client(Arc::new(client), config.cluster_id.clone()).await
    }

    /// Like [`Manager::new`] but with a caller-supplied service.
    pub async fn with_client(
        client: Arc<dyn NodePoolService>,
        cluster_id: String,
    ) -> Result<Self, CloudProviderError> {
        let manager = Manager {
            client,
            cluster_id,
            cache: RwLock::new(Arc::new(CacheSnapshot::default())),
        };
        manager.refresh().await?;
        Ok(manager)
    }

    /// Re-lists the cluster's node pools and swaps in a freshly built
    /// cache. All-or-nothing: on any failure the previous generation
    /// stays fully visible.
    pub async fn refresh(&self) -> Result<(), CloudProviderError> {
        let pools = self.client.list_node_pools(&self.cluster_id).await?;

        // Build the new generation completely off to the side; the only
        // synchronized step is the final pointer swap.
        let mut node_groups = HashMap::with_capacity(pools.len());
        let mut node_to_group = HashMap::new();
        for pool in &pools {
            // Size and member lists are deliberately not cached here;
            // they change outside our control and the handle fetches
            // them live.
            for node in &pool.nodes {
                node_to_group.insert(to_provider_id(&node.droplet_id), pool.id.clone());
            }
            node_groups.insert(
                pool.id.clone(),
                Arc::new(NodeGroup::new(
                    pool.id.clone(),
                    self.cluster_id.clone(),
                    Arc::clone(&self.client),
                )),
            );
        }
        debug!(
            "refreshed node-group cache: {} pools, {} nodes",
            node_groups.len(),
            node_to_group.len()
        );

        let snapshot = Arc::new(CacheSnapshot {
            node_groups,
            node_to_group,
        });
        *self.cache.write().unwrap() = snapshot;
        Ok(())
    }

    /// Cache read; never calls the remote API.
    pub fn node_group(&self, id: &str) -> Option<Arc<NodeGroup>> {
        self.cache.read().unwrap().node_groups.get(id).cloned()
    }

    /// Two-step lookup from node provider id to its owning group. A
    /// miss in either map is reported explicitly so the control loop
    /// can tell an unknown node from a cache inconsistency.
    pub fn node_group_for_node(
        &self,
        provider_id: &str,
    ) -> Result<Arc<NodeGroup>, CloudProviderError> {
        let cache = self.cache.read().unwrap();
        let group_id = cache
            .node_to_group
            .get(provider_id)
            .ok_or_else(|| CloudProviderError::NodeNotFound(provider_id.to_string()))?;
        cache
            .node_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| CloudProviderError::NodeGroupNotFound(group_id.clone()))
    }

    /// Snapshot of the cached node groups, order irrelevant.
    pub fn node_groups(&self) -> Vec<Arc<NodeGroup>> {
        self.cache
            .read()
            .unwrap()
            .node_groups
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::stub::{pool, StubNodePoolService};

    #[tokio::test]
    async fn construction_rejects_missing_credentials() {
        let err = Manager::new(&Config {
            cluster_id: "cluster-1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CloudProviderError::Config(_)));

        let err = Manager::new(&Config {
            token: "tok".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CloudProviderError::Config(_)));
    }

    #[tokio::test]
    async fn construction_fails_when_initial_refresh_fails() {
        let stub = Arc::new(StubNodePoolService::default());
        stub.fail_all.store(true, Ordering::SeqCst);
        let err = Manager::with_client(stub, "cluster-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudProviderError::Api(_)));
    }

    #[tokio::test]
    async fn refresh_builds_both_maps_from_one_listing() {
        let stub = Arc::new(StubNodePoolService::with_pools(vec![
            pool("p1", 2, &[Some("running"), Some("running")]),
            pool("p2", 1, &[Some("provisioning")]),
        ]));
        let manager = Manager::with_client(stub, "cluster-1".to_string())
            .await
            .unwrap();

        assert_eq!(manager.node_groups().len(), 2);
        assert!(manager.node_group("p1").is_some());
        assert!(manager.node_group("p2").is_some());
        assert!(manager.node_group("p3").is_none());

        // Referential integrity: every mapped node resolves to a group
        // present in the same snapshot.
        let ng = manager.node_group_for_node("digitalocean://1001").unwrap();
        assert!(manager.node_group(ng.id()).is_some());
    }

    #[tokio::test]
    async fn failed_refresh_leaves_previous_cache_untouched() {
        let stub = Arc::new(StubNodePoolService::with_pools(vec![pool(
            "p1",
            1,
            &[Some("running")],
        )]));
        let manager = Manager::with_client(stub.clone(), "cluster-1".to_string())
            .await
            .unwrap();

        stub.fail_all.store(true, Ordering::SeqCst);
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, CloudProviderError::Api(_)));

        // Previous generation still fully visible.
        assert_eq!(manager.node_groups().len(), 1);
        assert_eq!(
            manager
                .node_group_for_node("digitalocean://1001")
                .unwrap()
                .id(),
            "p1"
        );
    }

    #[tokio::test]
    async fn refresh_replaces_stale_groups() {
        let stub = Arc::new(StubNodePoolService::with_pools(vec![pool(
            "p1",
            1,
            &[Some("running")],
        )]));
        let manager = Manager::with_client(stub.clone(), "cluster-1".to_string())
            .await
            .unwrap();

        stub.set_pools(vec![pool("p2", 1, &[Some("running")])]);
        manager.refresh().await.unwrap();

        assert!(manager.node_group("p1").is_none());
        assert!(manager.node_group("p2").is_some());
    }

    #[tokio::test]
    async fn unmapped_node_is_an_explicit_error() {
        let stub = Arc::new(StubNodePoolService::with_pools(vec![pool("p1", 0, &[])]));
        let manager = Manager::with_client(stub, "cluster-1".to_string())
            .await
            .unwrap();

        let err = manager
            .node_group_for_node("digitalocean://4242")
            .unwrap_err();
        assert!(matches!(err, CloudProviderError::NodeNotFound(ref id) if id == "digitalocean://4242"));
    }
}
