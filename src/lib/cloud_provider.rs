use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CloudProviderError;
use crate::manager::Manager;
use crate::node_group::{NodeGroup, NodeRef};

/// Name the control loop knows this provider by.
pub const PROVIDER_NAME: &str = "digitalocean";

/// Label carried by GPU-bearing nodes.
pub const GPU_LABEL: &str = "cloud.digitalocean.com/gpu-node";

/// The capability set the autoscaling control loop requires from a
/// cloud provider.
///
/// Optional capabilities report [`CloudProviderError::NotImplemented`];
/// the loop treats that as "skip this feature", never as fatal.
#[async_trait]
pub trait CloudProvider {
    fn name(&self) -> &'static str;

    /// Snapshot of the cached node groups, order irrelevant.
    fn node_groups(&self) -> Vec<Arc<NodeGroup>>;

    /// Resolves a node to its owning group via the cache. An unmapped
    /// provider id is an explicit error, never an empty success.
    fn node_group_for_node(&self, node: &NodeRef) -> Result<Arc<NodeGroup>, CloudProviderError>;

    /// Called once per control cycle, before any other method.
    async fn refresh(&self) -> Result<(), CloudProviderError>;

    fn gpu_label(&self) -> &'static str;

    /// Pricing model. Not offered by this backend.
    fn pricing(&self) -> Result<(), CloudProviderError>;

    fn get_available_machine_types(&self) -> Result<Vec<String>, CloudProviderError>;

    /// Builds a theoretical node group for the given machine type. Not
    /// offered by this backend.
    fn new_node_group(&self, machine_type: &str) -> Result<Arc<NodeGroup>, CloudProviderError>;

    fn get_resource_limiter(&self) -> Result<(), CloudProviderError>;

    fn get_available_gpu_types(&self) -> Result<Vec<String>, CloudProviderError>;

    /// Releases provider resources before shutdown.
    fn cleanup(&self) -> Result<(), CloudProviderError>;
}

/// DigitalOcean Kubernetes implementation of [`CloudProvider`]. Reads
/// are served from the manager's cache; `refresh()` is the only method
/// that rebuilds it.
pub struct DoksCloudProvider {
    manager: Manager,
}

impl DoksCloudProvider {
    pub fn new(manager: Manager) -> Self {
        DoksCloudProvider { manager }
    }
}

// Compile-time check that the adapter satisfies the control loop's
// capability set; the full surface is exercised in tests/test.rs.
fn _assert_cloud_provider(p: &DoksCloudProvider) -> &dyn CloudProvider {
    p
}

#[async_trait]
impl CloudProvider for DoksCloudProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn node_groups(&self) -> Vec<Arc<NodeGroup>> {
        self.manager.node_groups()
    }

    fn node_group_for_node(&self, node: &NodeRef) -> Result<Arc<NodeGroup>, CloudProviderError> {
        self.manager.node_group_for_node(&node.provider_id)
    }

    async fn refresh(&self) -> Result<(), CloudProviderError> {
        self.manager.refresh().await
    }

    fn gpu_label(&self) -> &'static str {
        GPU_LABEL
    }

    fn pricing(&self) -> Result<(), CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    fn get_available_machine_types(&self) -> Result<Vec<String>, CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    fn new_node_group(&self, _machine_type: &str) -> Result<Arc<NodeGroup>, CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    fn get_resource_limiter(&self) -> Result<(), CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    fn get_available_gpu_types(&self) -> Result<Vec<String>, CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    fn cleanup(&self) -> Result<(), CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }
}
