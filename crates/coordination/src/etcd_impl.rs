use std::collections::HashMap;
use std::time::Duration;

use actor_common::{ResourceNamespace, WebhookInfo};
use async_trait::async_trait;
use etcd_client::{Compare, CompareOp, PutOptions, Txn, TxnOp};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::CoordinationClient;
use crate::error::{Error, Result};
use crate::signal::ChangeSignal;
use crate::store::EtcdStore;

#[derive(Debug, Clone)]
pub struct EtcdCoordinationClientConfig {
    pub endpoints: Vec<String>,
    /// Well-known root all coordination paths live under, e.g. "/actord/".
    pub prefix: String,
    /// TTL for an actor's ephemeral session lease. Claims and membership
    /// records share this lease, so losing it drops both at once.
    pub session_ttl_seconds: i64,
    pub keepalive_interval: Duration,
}

/// Production `CoordinationClient`, backed by etcd.
///
/// Membership and claims are both ephemeral records tied to one lease per
/// actor session: registering acquires the lease and starts a keepalive
/// task; resigning (or the keepalive task dying) revokes it, which drops
/// every claim the actor held in a single stroke — the same mechanism
/// `leader_election::try_lead`/`run_lease_keepalive` uses for leadership
/// leases, generalized here to ordinary session leases instead of a single
/// leader key.
pub struct EtcdCoordinationClient {
    store: EtcdStore,
    config: EtcdCoordinationClientConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

struct Session {
    lease_id: i64,
    cancel: CancellationToken,
}

impl EtcdCoordinationClient {
    pub async fn connect(config: EtcdCoordinationClientConfig) -> Result<Self> {
        let store = EtcdStore::connect(crate::store::StoreConfig {
            endpoints: config.endpoints.clone(),
            prefix: config.prefix.clone(),
        })
        .await?;
        Ok(Self {
            store,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn actor_key(&self, id: &str) -> String {
        format!("{}actors/{}", self.config.prefix, id)
    }

    fn owner_key(&self, namespace: ResourceNamespace, resource: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.prefix,
            namespace.owners_path(),
            resource
        )
    }

    fn resources_prefix(&self, namespace: ResourceNamespace) -> String {
        format!("{}{}/", self.config.prefix, namespace.resources_path())
    }

    fn disabled_webhooks_prefix(&self) -> String {
        format!("{}resources/webhooks_off/", self.config.prefix)
    }

    fn webhook_info_key(&self, resource: &str) -> String {
        format!("{}webhooks/{}", self.config.prefix, resource)
    }

    async fn lease_for(&self, actor_id: &str) -> Result<i64> {
        self.sessions
            .lock()
            .await
            .get(actor_id)
            .map(|s| s.lease_id)
            .ok_or_else(|| Error::InvalidState(format!("no active session for actor {actor_id}")))
    }

    async fn watch_prefix(&self, prefix: String) -> Result<ChangeSignal> {
        let mut stream = self.store.watch(&prefix).await?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            // Surface the first event, or the stream ending (session loss),
            // as the one-shot change.
            let _ = stream.message().await;
            let _ = tx.send(());
        });
        Ok(ChangeSignal::new(rx))
    }

    async fn run_keepalive(store: EtcdStore, lease_id: i64, interval: Duration, cancel: CancellationToken) {
        let (mut keeper, mut stream) = match store.keep_alive(lease_id).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "failed to start lease keepalive");
                cancel.cancel();
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {
                    if keeper.keep_alive().await.is_err() {
                        tracing::warn!("lease keepalive send failed, session lost");
                        cancel.cancel();
                        return;
                    }
                    match stream.message().await {
                        Ok(Some(_)) => {}
                        _ => {
                            tracing::warn!("lease keepalive stream closed, session lost");
                            cancel.cancel();
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for EtcdCoordinationClient {
    async fn register_actor(&self, id: &str, payload: &str) -> Result<()> {
        let lease_id = self.store.grant_lease(self.config.session_ttl_seconds).await?;
        let key = self.actor_key(id);

        let txn = Txn::new()
            .when(vec![Compare::version(key.clone(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key.clone(),
                payload.as_bytes().to_vec(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let resp = self.store.txn(txn).await?;
        if !resp.succeeded() {
            let _ = self.store.revoke_lease(lease_id).await;
            return Err(Error::Conflict(id.to_string()));
        }

        let cancel = CancellationToken::new();
        tokio::spawn(Self::run_keepalive(
            self.store.clone(),
            lease_id,
            self.config.keepalive_interval,
            cancel.clone(),
        ));
        self.sessions
            .lock()
            .await
            .insert(id.to_string(), Session { lease_id, cancel });
        Ok(())
    }

    async fn resign_actor(&self, id: &str) -> Result<()> {
        if let Some(session) = self.sessions.lock().await.remove(id) {
            session.cancel.cancel();
            let _ = self.store.revoke_lease(session.lease_id).await;
        }
        let _ = self.store.delete(&self.actor_key(id)).await;
        Ok(())
    }

    async fn actor_registered(&self, id: &str) -> Result<bool> {
        Ok(self.store.get_raw(&self.actor_key(id)).await?.is_some())
    }

    async fn watch_actors(&self) -> Result<(Vec<String>, ChangeSignal)> {
        let prefix = format!("{}actors/", self.config.prefix);
        let list = self.store.list_key_names(&prefix).await?;
        let signal = self.watch_prefix(prefix).await?;
        Ok((list, signal))
    }

    async fn watch_resources(
        &self,
        namespace: ResourceNamespace,
    ) -> Result<(Vec<String>, ChangeSignal)> {
        let prefix = self.resources_prefix(namespace);
        let list = self.store.list_key_names(&prefix).await?;
        let signal = self.watch_prefix(prefix).await?;
        Ok((list, signal))
    }

    async fn watch_disabled_webhooks(&self) -> Result<(Vec<String>, ChangeSignal)> {
        let prefix = self.disabled_webhooks_prefix();
        // A missing prefix is an empty list, not an error: list_key_names
        // already returns an empty Vec when nothing matches.
        let list = self.store.list_key_names(&prefix).await?;
        let signal = self.watch_prefix(prefix).await?;
        Ok((list, signal))
    }

    async fn claim_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()> {
        let lease_id = self.lease_for(actor_id).await?;
        let key = self.owner_key(namespace, resource);
        let txn = Txn::new()
            .when(vec![Compare::version(key.clone(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key.clone(),
                actor_id.as_bytes().to_vec(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let resp = self.store.txn(txn).await?;
        if !resp.succeeded() {
            return Err(Error::ClaimedByOthers(resource.to_string()));
        }
        Ok(())
    }

    async fn release_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()> {
        let key = self.owner_key(namespace, resource);
        // Only release a claim we actually hold: compare the stored value
        // against our own actor id before deleting, so a stale release call
        // after a claim already moved on can't evict the new owner.
        if let Some(value) = self.store.get_raw(&key).await? {
            if value == actor_id.as_bytes() {
                let _ = self.store.delete(&key).await;
            }
        }
        Ok(())
    }

    async fn webhook_info(&self, resource: &str) -> Result<Option<WebhookInfo>> {
        self.store.get(&self.webhook_info_key(resource)).await
    }
}
