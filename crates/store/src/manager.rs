use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ManagerError;

/// Authentication / topic-ownership lookup service. Out of scope to
/// implement in full (it backs the external `PubServer` too) — the core
/// only ever calls `lookup_cluster` and `kafka_topic`. The rest of the
/// contract is kept on the trait because it is part of the same
/// compatibility surface, with default bodies that the in-memory double
/// does not need to override.
#[async_trait]
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    async fn auth_admin(&self, _appid: &str, _key: &str) -> Result<bool, ManagerError> {
        Ok(false)
    }

    async fn own_topic(&self, _appid: &str, _topic: &str) -> Result<bool, ManagerError> {
        Ok(false)
    }

    async fn auth_sub(&self, _appid: &str, _key: &str) -> Result<bool, ManagerError> {
        Ok(false)
    }

    async fn is_guarded_topic(&self, _topic: &str) -> Result<bool, ManagerError> {
        Ok(false)
    }

    /// `appid -> cluster`. `Ok(None)` means the lookup succeeded but no
    /// cluster owns this app.
    async fn lookup_cluster(&self, appid: &str) -> Result<Option<String>, ManagerError>;

    /// `(appid, topic, ver) -> concrete broker topic name`.
    async fn kafka_topic(&self, appid: &str, topic: &str, ver: u32) -> Result<String, ManagerError>;
}

/// Production `Manager`, a thin HTTP client over the external lookup
/// service. Endpoints are whatever the deployed `Manager` service exposes;
/// this adapter only shapes requests/responses for the two calls the core
/// makes.
pub struct HttpManager {
    base_url: String,
    client: reqwest::Client,
}

impl HttpManager {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(serde::Deserialize)]
struct LookupClusterResponse {
    cluster: Option<String>,
}

#[derive(serde::Deserialize)]
struct KafkaTopicResponse {
    topic: String,
}

#[async_trait]
impl Manager for HttpManager {
    fn name(&self) -> &str {
        "http-manager"
    }

    async fn lookup_cluster(&self, appid: &str) -> Result<Option<String>, ManagerError> {
        let url = format!("{}/clusters/{appid}", self.base_url);
        let resp: LookupClusterResponse = self.client.get(url).send().await?.json().await?;
        Ok(resp.cluster)
    }

    async fn kafka_topic(&self, appid: &str, topic: &str, ver: u32) -> Result<String, ManagerError> {
        let url = format!("{}/topics/{appid}/{topic}/{ver}", self.base_url);
        let resp: KafkaTopicResponse = self.client.get(url).send().await?.json().await?;
        Ok(resp.topic)
    }
}

/// In-memory `Manager` double for tests: a fixed appid->cluster map, and a
/// deterministic topic-naming function (`"<appid>.<topic>.v<ver>"`) unless
/// an override was seeded.
#[derive(Clone, Default)]
pub struct InMemoryManager {
    clusters: Arc<RwLock<HashMap<String, String>>>,
    topic_overrides: Arc<RwLock<HashMap<(String, String, u32), String>>>,
}

impl InMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_cluster(&self, appid: &str, cluster: &str) {
        self.clusters
            .write()
            .await
            .insert(appid.to_string(), cluster.to_string());
    }

    pub async fn set_topic_override(&self, appid: &str, topic: &str, ver: u32, concrete: &str) {
        self.topic_overrides.write().await.insert(
            (appid.to_string(), topic.to_string(), ver),
            concrete.to_string(),
        );
    }
}

#[async_trait]
impl Manager for InMemoryManager {
    fn name(&self) -> &str {
        "in-memory-manager"
    }

    async fn lookup_cluster(&self, appid: &str) -> Result<Option<String>, ManagerError> {
        Ok(self.clusters.read().await.get(appid).cloned())
    }

    async fn kafka_topic(&self, appid: &str, topic: &str, ver: u32) -> Result<String, ManagerError> {
        if let Some(concrete) = self
            .topic_overrides
            .read()
            .await
            .get(&(appid.to_string(), topic.to_string(), ver))
        {
            return Ok(concrete.clone());
        }
        Ok(format!("{appid}.{topic}.v{ver}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_cluster_returns_none_when_unset() {
        let manager = InMemoryManager::new();
        assert_eq!(manager.lookup_cluster("app1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lookup_cluster_returns_seeded_value() {
        let manager = InMemoryManager::new();
        manager.set_cluster("app1", "cluster-a").await;
        assert_eq!(
            manager.lookup_cluster("app1").await.unwrap(),
            Some("cluster-a".to_string())
        );
    }

    #[tokio::test]
    async fn kafka_topic_defaults_to_deterministic_name() {
        let manager = InMemoryManager::new();
        assert_eq!(
            manager.kafka_topic("app1", "orders", 1).await.unwrap(),
            "app1.orders.v1"
        );
    }
}
