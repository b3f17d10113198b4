use async_trait::async_trait;
use serde::Deserialize;

/// Public API endpoint used when the configuration carries no override.
pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com";

const USER_AGENT_PRODUCT: &str = "cluster-autoscaler-digitalocean";
const PER_PAGE: usize = 200;

/// A node pool as reported by the managed-Kubernetes API.
#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesNodePool {
    pub id: String,
    pub name: String,
    /// Declared target size. May transiently differ from `nodes.len()`
    /// while the control plane converges.
    pub count: i32,
    #[serde(default)]
    pub nodes: Vec<KubernetesNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesNode {
    pub id: String,
    pub droplet_id: String,
    /// Absent for nodes the control plane has not reported on yet.
    pub status: Option<KubernetesNodeStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesNodeStatus {
    pub state: String,
    #[serde(default)]
    pub message: String,
}

/// Errors from the remote node-pool API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The pool or node does not exist on the remote side.
    #[error("not found")]
    NotFound,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// The node-pool surface of the remote control plane.
///
/// Implemented by [`DoksClient`] for the real API and by in-memory
/// stubs in tests. Pagination, retries and timeouts are this layer's
/// business; callers see one logical call per operation.
#[async_trait]
pub trait NodePoolService: Send + Sync {
    async fn list_node_pools(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<KubernetesNodePool>, ApiError>;

    async fn get_node_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
    ) -> Result<KubernetesNodePool, ApiError>;

    async fn resize_node_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
        count: i32,
    ) -> Result<(), ApiError>;

    async fn delete_node(
        &self,
        cluster_id: &str,
        pool_id: &str,
        node_id: &str,
    ) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct PoolListResponse {
    node_pools: Vec<KubernetesNodePool>,
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct PoolResponse {
    node_pool: KubernetesNodePool,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Authenticated HTTP client for the DigitalOcean Kubernetes API.
pub struct DoksClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl DoksClient {
    pub fn new(
        token: &str,
        url: Option<&str>,
        version: Option<&str>,
    ) -> Result<Self, ApiError> {
        let version = version.filter(|v| !v.is_empty()).unwrap_or("dev");
        let http = reqwest::Client::builder()
            .user_agent(format!("{USER_AGENT_PRODUCT}/{version}"))
            .build()?;
        let base_url = url
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(DoksClient {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    fn pools_url(&self, cluster_id: &str) -> String {
        format!(
            "{}/v2/kubernetes/clusters/{}/node_pools",
            self.base_url, cluster_id
        )
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        let message = match resp.json::<ApiErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => "no error detail in response".to_string(),
        };
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// True once every page of the pool listing has been collected.
fn list_complete(fetched: usize, batch_len: usize, total: Option<u64>) -> bool {
    if batch_len == 0 {
        return true;
    }
    match total {
        Some(total) => fetched as u64 >= total,
        None => batch_len < PER_PAGE,
    }
}

#[async_trait]
impl NodePoolService for DoksClient {
    async fn list_node_pools(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<KubernetesNodePool>, ApiError> {
        let url = self.pools_url(cluster_id);
        let mut pools: Vec<KubernetesNodePool> = vec![];
        let mut page: usize = 1;
        loop {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[("page", page.to_string()), ("per_page", PER_PAGE.to_string())])
                .send()
                .await?;
            let body: PoolListResponse = Self::check(resp).await?.json().await?;
            let total = body.meta.map(|m| m.total);
            let batch_len = body.node_pools.len();
            pools.extend(body.node_pools);
            if list_complete(pools.len(), batch_len, total) {
                break;
            }
            page += 1;
        }
        Ok(pools)
    }

    async fn get_node_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
    ) -> Result<KubernetesNodePool, ApiError> {
        let url = format!("{}/{}", self.pools_url(cluster_id), pool_id);
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let body: PoolResponse = Self::check(resp).await?.json().await?;
        Ok(body.node_pool)
    }

    async fn resize_node_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
        count: i32,
    ) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.pools_url(cluster_id), pool_id);
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "count": count }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_node(
        &self,
        cluster_id: &str,
        pool_id: &str,
        node_id: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}/{}/nodes/{}", self.pools_url(cluster_id), pool_id, node_id);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory [`NodePoolService`] that counts every remote call, so
    /// tests can assert that preconditions fail before any round trip.
    #[derive(Default)]
    pub struct StubNodePoolService {
        pools: Mutex<Vec<KubernetesNodePool>>,
        pub calls: AtomicUsize,
        pub fail_all: AtomicBool,
        pub resizes: Mutex<Vec<(String, i32)>>,
        pub deleted: Mutex<Vec<String>>,
    }

    impl StubNodePoolService {
        pub fn with_pools(pools: Vec<KubernetesNodePool>) -> Self {
            StubNodePoolService {
                pools: Mutex::new(pools),
                ..Default::default()
            }
        }

        pub fn set_pools(&self, pools: Vec<KubernetesNodePool>) {
            *self.pools.lock().unwrap() = pools;
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn tick(&self) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(ApiError::Api {
                    status: 500,
                    message: "stub failure".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NodePoolService for StubNodePoolService {
        async fn list_node_pools(
            &self,
            _cluster_id: &str,
        ) -> Result<Vec<KubernetesNodePool>, ApiError> {
            self.tick()?;
            Ok(self.pools.lock().unwrap().clone())
        }

        async fn get_node_pool(
            &self,
            _cluster_id: &str,
            pool_id: &str,
        ) -> Result<KubernetesNodePool, ApiError> {
            self.tick()?;
            self.pools
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.id == pool_id)
                .cloned()
                .ok_or(ApiError::NotFound)
        }

        async fn resize_node_pool(
            &self,
            _cluster_id: &str,
            pool_id: &str,
            count: i32,
        ) -> Result<(), ApiError> {
            self.tick()?;
            let mut pools = self.pools.lock().unwrap();
            let pool = pools
                .iter_mut()
                .find(|p| p.id == pool_id)
                .ok_or(ApiError::NotFound)?;
            pool.count = count;
            self.resizes
                .lock()
                .unwrap()
                .push((pool_id.to_string(), count));
            Ok(())
        }

        async fn delete_node(
            &self,
            _cluster_id: &str,
            pool_id: &str,
            node_id: &str,
        ) -> Result<(), ApiError> {
            self.tick()?;
            let mut pools = self.pools.lock().unwrap();
            let pool = pools
                .iter_mut()
                .find(|p| p.id == pool_id)
                .ok_or(ApiError::NotFound)?;
            let before = pool.nodes.len();
            pool.nodes.retain(|n| n.id != node_id);
            if pool.nodes.len() == before {
                return Err(ApiError::NotFound);
            }
            self.deleted.lock().unwrap().push(node_id.to_string());
            Ok(())
        }
    }

    /// Pool fixture. Node ids are `<pool>-node-<i>`, droplet ids are
    /// numeric strings starting at 1001.
    pub fn pool(id: &str, count: i32, states: &[Option<&str>]) -> KubernetesNodePool {
        KubernetesNodePool {
            id: id.to_string(),
            name: format!("{id}-name"),
            count,
            nodes: states
                .iter()
                .enumerate()
                .map(|(i, state)| KubernetesNode {
                    id: format!("{id}-node-{i}"),
                    droplet_id: format!("{}", 1001 + i),
                    status: state.map(|s| KubernetesNodeStatus {
                        state: s.to_string(),
                        message: String::new(),
                    }),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_stops_once_total_is_covered() {
        assert!(list_complete(3, 3, Some(3)));
        assert!(!list_complete(PER_PAGE, PER_PAGE, Some(PER_PAGE as u64 + 1)));
        assert!(list_complete(PER_PAGE + 1, 1, Some(PER_PAGE as u64 + 1)));
    }

    #[test]
    fn listing_without_meta_stops_on_short_page() {
        assert!(list_complete(3, 3, None));
        assert!(!list_complete(PER_PAGE, PER_PAGE, None));
    }

    #[test]
    fn empty_page_always_terminates() {
        assert!(list_complete(0, 0, Some(10)));
        assert!(list_complete(0, 0, None));
    }

    #[test]
    fn node_pool_wire_format() {
        let body = r#"{
            "id": "p1",
            "name": "pool-1",
            "count": 2,
            "nodes": [
                {"id": "n1", "droplet_id": "1001", "status": {"state": "running"}},
                {"id": "n2", "droplet_id": "1002"}
            ]
        }"#;
        let pool: KubernetesNodePool = serde_json::from_str(body).unwrap();
        assert_eq!(pool.id, "p1");
        assert_eq!(pool.count, 2);
        assert_eq!(pool.nodes[0].status.as_ref().unwrap().state, "running");
        assert!(pool.nodes[1].status.is_none());
    }
}
