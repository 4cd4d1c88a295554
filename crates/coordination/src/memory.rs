use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use actor_common::{ResourceNamespace, WebhookInfo};
use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::client::CoordinationClient;
use crate::error::{Error, Result};
use crate::signal::ChangeSignal;

/// In-memory `CoordinationClient` double for tests. Not cluster-safe — it
/// models a single coordination store shared by however many `Actor`
/// instances hold a clone of it in one process.
#[derive(Clone)]
pub struct InMemoryCoordinationClient {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    actors: BTreeSet<String>,
    jobqueue_resources: BTreeSet<String>,
    webhook_resources: BTreeSet<String>,
    disabled_webhooks: BTreeSet<String>,
    claims: HashMap<(NsKey, String), String>,
    webhook_infos: HashMap<String, WebhookInfo>,
    actors_notify: Arc<Notify>,
    jobqueue_notify: Arc<Notify>,
    webhook_notify: Arc<Notify>,
    disabled_notify: Arc<Notify>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum NsKey {
    JobQueue,
    Webhook,
}

impl From<ResourceNamespace> for NsKey {
    fn from(ns: ResourceNamespace) -> Self {
        match ns {
            ResourceNamespace::JobQueue => NsKey::JobQueue,
            ResourceNamespace::Webhook => NsKey::Webhook,
        }
    }
}

impl Default for InMemoryCoordinationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                actors: BTreeSet::new(),
                jobqueue_resources: BTreeSet::new(),
                webhook_resources: BTreeSet::new(),
                disabled_webhooks: BTreeSet::new(),
                claims: HashMap::new(),
                webhook_infos: HashMap::new(),
                actors_notify: Arc::new(Notify::new()),
                jobqueue_notify: Arc::new(Notify::new()),
                webhook_notify: Arc::new(Notify::new()),
                disabled_notify: Arc::new(Notify::new()),
            })),
        }
    }

    pub async fn add_jobqueue_resource(&self, resource: &str) {
        let mut inner = self.inner.lock().await;
        inner.jobqueue_resources.insert(resource.to_string());
        inner.jobqueue_notify.notify_waiters();
    }

    pub async fn add_webhook_resource(&self, resource: &str, info: WebhookInfo) {
        let mut inner = self.inner.lock().await;
        inner.webhook_resources.insert(resource.to_string());
        inner.webhook_infos.insert(resource.to_string(), info);
        inner.webhook_notify.notify_waiters();
    }

    pub async fn disable_webhook(&self, resource: &str) {
        let mut inner = self.inner.lock().await;
        inner.disabled_webhooks.insert(resource.to_string());
        inner.disabled_notify.notify_waiters();
    }

    pub async fn enable_webhook(&self, resource: &str) {
        let mut inner = self.inner.lock().await;
        inner.disabled_webhooks.remove(resource);
        inner.disabled_notify.notify_waiters();
    }

    /// Simulate coordination-session loss for `actor_id`: drops its
    /// membership record and every claim it held.
    pub async fn drop_session(&self, actor_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.actors.remove(actor_id);
        inner.claims.retain(|_, owner| owner != actor_id);
        inner.actors_notify.notify_waiters();
        inner.jobqueue_notify.notify_waiters();
        inner.webhook_notify.notify_waiters();
    }

    pub async fn claim_owner(&self, namespace: ResourceNamespace, resource: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.claims.get(&(namespace.into(), resource.to_string())).cloned()
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordinationClient {
    async fn register_actor(&self, id: &str, _payload: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.actors.insert(id.to_string()) {
            return Err(Error::Conflict(id.to_string()));
        }
        inner.actors_notify.notify_waiters();
        Ok(())
    }

    async fn resign_actor(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.actors.remove(id);
        inner.claims.retain(|_, owner| owner != id);
        inner.actors_notify.notify_waiters();
        Ok(())
    }

    async fn actor_registered(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.actors.contains(id))
    }

    async fn watch_actors(&self) -> Result<(Vec<String>, ChangeSignal)> {
        let inner = self.inner.lock().await;
        let list = inner.actors.iter().cloned().collect();
        Ok((list, notify_signal(inner.actors_notify.clone())))
    }

    async fn watch_resources(
        &self,
        namespace: ResourceNamespace,
    ) -> Result<(Vec<String>, ChangeSignal)> {
        let inner = self.inner.lock().await;
        match namespace {
            ResourceNamespace::JobQueue => Ok((
                inner.jobqueue_resources.iter().cloned().collect(),
                notify_signal(inner.jobqueue_notify.clone()),
            )),
            ResourceNamespace::Webhook => Ok((
                inner.webhook_resources.iter().cloned().collect(),
                notify_signal(inner.webhook_notify.clone()),
            )),
        }
    }

    async fn watch_disabled_webhooks(&self) -> Result<(Vec<String>, ChangeSignal)> {
        let inner = self.inner.lock().await;
        Ok((
            inner.disabled_webhooks.iter().cloned().collect(),
            notify_signal(inner.disabled_notify.clone()),
        ))
    }

    async fn claim_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (namespace.into(), resource.to_string());
        if inner.claims.contains_key(&key) {
            return Err(Error::ClaimedByOthers(resource.to_string()));
        }
        inner.claims.insert(key, actor_id.to_string());
        Ok(())
    }

    async fn release_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (namespace.into(), resource.to_string());
        if inner.claims.get(&key) == Some(&actor_id.to_string()) {
            inner.claims.remove(&key);
        }
        Ok(())
    }

    async fn webhook_info(&self, resource: &str) -> Result<Option<WebhookInfo>> {
        Ok(self.inner.lock().await.webhook_infos.get(resource).cloned())
    }
}

fn notify_signal(notify: Arc<Notify>) -> ChangeSignal {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        notify.notified().await;
        let _ = tx.send(());
    });
    ChangeSignal::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_conflict() {
        let client = InMemoryCoordinationClient::new();
        client.register_actor("a1", "{}").await.unwrap();
        assert!(matches!(
            client.register_actor("a1", "{}").await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn resign_is_idempotent() {
        let client = InMemoryCoordinationClient::new();
        client.register_actor("a1", "{}").await.unwrap();
        client.resign_actor("a1").await.unwrap();
        client.resign_actor("a1").await.unwrap();
        assert!(!client.actor_registered("a1").await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let client = InMemoryCoordinationClient::new();
        client
            .claim_resource("a1", ResourceNamespace::Webhook, "w1")
            .await
            .unwrap();
        assert!(matches!(
            client
                .claim_resource("a2", ResourceNamespace::Webhook, "w1")
                .await,
            Err(Error::ClaimedByOthers(_))
        ));
    }

    #[tokio::test]
    async fn release_then_reclaim() {
        let client = InMemoryCoordinationClient::new();
        client
            .claim_resource("a1", ResourceNamespace::Webhook, "w1")
            .await
            .unwrap();
        client
            .release_resource("a1", ResourceNamespace::Webhook, "w1")
            .await
            .unwrap();
        client
            .claim_resource("a2", ResourceNamespace::Webhook, "w1")
            .await
            .unwrap();
        assert_eq!(
            client.claim_owner(ResourceNamespace::Webhook, "w1").await,
            Some("a2".to_string())
        );
    }

    #[tokio::test]
    async fn watch_actors_fires_on_registration() {
        let client = InMemoryCoordinationClient::new();
        let (initial, signal) = client.watch_actors().await.unwrap();
        assert!(initial.is_empty());
        client.register_actor("a1", "{}").await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.changed())
            .await
            .expect("signal should fire");
    }

    #[tokio::test]
    async fn drop_session_releases_claims_and_membership() {
        let client = InMemoryCoordinationClient::new();
        client.register_actor("a1", "{}").await.unwrap();
        client
            .claim_resource("a1", ResourceNamespace::Webhook, "w1")
            .await
            .unwrap();
        client.drop_session("a1").await;
        assert!(!client.actor_registered("a1").await.unwrap());
        assert_eq!(client.claim_owner(ResourceNamespace::Webhook, "w1").await, None);
    }
}
