use std::fmt;
use std::sync::Arc;

use crate::client::{ApiError, KubernetesNode, KubernetesNodePool, KubernetesNodeStatus, NodePoolService};
use crate::error::CloudProviderError;

// Provider-wide pool bounds. Not configurable per pool at this point.
const MIN_NODE_POOL_SIZE: i32 = 1;
const MAX_NODE_POOL_SIZE: i32 = 200;

pub(crate) const PROVIDER_ID_PREFIX: &str = "digitalocean://";

const NO_ERROR_CODE: &str = "no-code-digitalocean";

/// A node as reported to the control loop. `id` is always set; `status`
/// only when the backend reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub status: Option<InstanceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub state: Option<InstanceState>,
    pub error_info: Option<InstanceErrorInfo>,
}

/// The fixed lifecycle vocabulary the control loop understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Running,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceErrorInfo {
    pub error_class: InstanceErrorClass,
    pub error_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceErrorClass {
    OutOfResources,
    Other,
}

/// Reference to a cluster node handed to us by the control loop.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub name: String,
    pub provider_id: String,
}

/// Handle for one remote node pool.
///
/// Carries only its identity and a client reference; size and
/// membership are fetched live on every call so the autoscaler never
/// acts on stale capacity data. Handles are rebuilt on every manager
/// refresh and do not outlive the cycle that produced them.
#[derive(Clone)]
pub struct NodeGroup {
    id: String,
    cluster_id: String,
    client: Arc<dyn NodePoolService>,
}

impl NodeGroup {
    pub(crate) fn new(id: String, cluster_id: String, client: Arc<dyn NodePoolService>) -> Self {
        NodeGroup {
            id,
            cluster_id,
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn min_size(&self) -> i32 {
        MIN_NODE_POOL_SIZE
    }

    pub fn max_size(&self) -> i32 {
        MAX_NODE_POOL_SIZE
    }

    /// Human-readable `id (min:max)` summary.
    pub fn debug(&self) -> String {
        format!("{} ({}:{})", self.id, self.min_size(), self.max_size())
    }

    /// The size the pool is requested to converge to. Live call: the
    /// autoscaler polls this to see whether a resize has been applied.
    pub async fn target_size(&self) -> Result<i32, CloudProviderError> {
        let pool = self.get_node_pool().await?;
        Ok(pool.count)
    }

    /// Requests `delta` additional nodes. Returns once the API has
    /// acknowledged the new target; convergence is observed later via
    /// [`NodeGroup::nodes`].
    pub async fn increase_size(&self, delta: i32) -> Result<(), CloudProviderError> {
        if delta <= 0 {
            return Err(CloudProviderError::DeltaNotPositive(delta));
        }
        let pool = self.get_node_pool().await?;
        // Saturate on overflow; the bound check below rejects it.
        let desired = pool.count.checked_add(delta).unwrap_or(i32::MAX);
        if desired > self.max_size() {
            return Err(CloudProviderError::SizeIncreaseTooLarge {
                current: pool.count,
                desired,
                max: self.max_size(),
            });
        }
        info!("resizing node pool {} from {} to {desired}", self.id, pool.count);
        self.client
            .resize_node_pool(&self.cluster_id, &self.id, desired)
            .await?;
        Ok(())
    }

    /// Retracts outstanding unfulfilled scale-up requests. Never causes
    /// deletion of an already-provisioned node: a target below the
    /// current member count is rejected before any remote call is made.
    pub async fn decrease_target_size(&self, delta: i32) -> Result<(), CloudProviderError> {
        if delta >= 0 {
            return Err(CloudProviderError::DeltaNotNegative(delta));
        }
        let pool = self.get_node_pool().await?;
        // Saturate on underflow; the floor check below rejects it.
        let desired = pool.count.checked_add(delta).unwrap_or(i32::MIN);
        let existing = pool.nodes.len() as i32;
        if desired < existing {
            return Err(CloudProviderError::SizeDecreaseTooLarge {
                current: pool.count,
                desired,
                existing,
            });
        }
        info!(
            "retracting node pool {} target from {} to {desired}",
            self.id, pool.count
        );
        self.client
            .resize_node_pool(&self.cluster_id, &self.id, desired)
            .await?;
        Ok(())
    }

    /// Deletes the named nodes from this pool. A node that is not a
    /// member is rejected without issuing its delete call; deletions
    /// already issued for earlier nodes are not rolled back.
    pub async fn delete_nodes(&self, nodes: &[NodeRef]) -> Result<(), CloudProviderError> {
        let pool = self.get_node_pool().await?;
        for node in nodes {
            let member = pool
                .nodes
                .iter()
                .find(|m| to_provider_id(&m.droplet_id) == node.provider_id)
                .ok_or_else(|| CloudProviderError::NotMember {
                    node: node.name.clone(),
                    group: self.id.clone(),
                })?;
            info!("deleting node {} from node pool {}", node.name, self.id);
            self.client
                .delete_node(&self.cluster_id, &self.id, &member.id)
                .await?;
        }
        Ok(())
    }

    /// Current members of the pool, projected into the instance-status
    /// vocabulary, in the order the backend reports them.
    pub async fn nodes(&self) -> Result<Vec<Instance>, CloudProviderError> {
        let pool = self.get_node_pool().await?;
        Ok(to_instances(&pool.nodes))
    }

    /// Whether the pool still exists on the remote side. Existence is a
    /// boolean gate for the control loop, so errors other than
    /// not-found collapse to `false` with a logged diagnostic.
    pub async fn exist(&self) -> bool {
        match self.client.get_node_pool(&self.cluster_id, &self.id).await {
            Ok(_) => true,
            Err(ApiError::NotFound) => false,
            Err(e) => {
                error!("couldn't obtain node pool information: {e}");
                false
            }
        }
    }

    /// Dynamic group creation is not supported by this backend.
    pub fn create(&self) -> Result<NodeGroup, CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    /// Dynamic group deletion is not supported by this backend.
    pub fn delete(&self) -> Result<(), CloudProviderError> {
        Err(CloudProviderError::NotImplemented)
    }

    pub fn autoprovisioned(&self) -> bool {
        false
    }

    async fn get_node_pool(&self) -> Result<KubernetesNodePool, ApiError> {
        self.client.get_node_pool(&self.cluster_id, &self.id).await
    }
}

impl fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.debug())
    }
}

pub(crate) fn to_provider_id(droplet_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{droplet_id}")
}

fn to_instances(nodes: &[KubernetesNode]) -> Vec<Instance> {
    nodes.iter().map(to_instance).collect()
}

fn to_instance(node: &KubernetesNode) -> Instance {
    Instance {
        id: to_provider_id(&node.droplet_id),
        status: node.status.as_ref().map(to_instance_status),
    }
}

/// Projects the backend's lifecycle states into the fixed vocabulary.
/// Unrecognized states surface as errors so the control loop never
/// mistakes an unknown-state node for a healthy one.
fn to_instance_status(status: &KubernetesNodeStatus) -> InstanceStatus {
    let state = match status.state.as_str() {
        "provisioning" => InstanceState::Creating,
        "running" => InstanceState::Running,
        "draining" | "deleting" => InstanceState::Deleting,
        _ => {
            return InstanceStatus {
                state: None,
                error_info: Some(InstanceErrorInfo {
                    error_class: InstanceErrorClass::Other,
                    error_code: NO_ERROR_CODE.to_string(),
                    error_message: status.message.clone(),
                }),
            }
        }
    };
    InstanceStatus {
        state: Some(state),
        error_info: None,
    }
}
