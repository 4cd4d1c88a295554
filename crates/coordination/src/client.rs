use async_trait::async_trait;
use actor_common::{ResourceNamespace, WebhookInfo};

use crate::error::Result;
use crate::signal::ChangeSignal;

/// Thin contract over the coordination service: ephemeral membership,
/// watched resource lists, and exclusive resource claims. This is the only
/// surface the rest of the core (assignment, controller, executors) uses —
/// nothing upstream ever talks to etcd (or whatever backs the production
/// implementation) directly.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Register this actor as an ephemeral member. Fails with
    /// `Error::Conflict` if a record with `id` already exists. The record
    /// disappears when this actor's coordination session ends.
    async fn register_actor(&self, id: &str, payload: &str) -> Result<()>;

    /// Voluntarily give up membership. Idempotent.
    async fn resign_actor(&self, id: &str) -> Result<()>;

    async fn actor_registered(&self, id: &str) -> Result<bool>;

    /// Current sorted membership and a one-shot signal that fires on any change.
    async fn watch_actors(&self) -> Result<(Vec<String>, ChangeSignal)>;

    /// Current sorted resource list for `namespace` and a one-shot change signal.
    /// For `ResourceNamespace::Webhook`'s disabled-mask companion, use
    /// `watch_disabled_webhooks` instead — a "not found" prefix there is
    /// equivalent to an empty list, not an error.
    async fn watch_resources(&self, namespace: ResourceNamespace) -> Result<(Vec<String>, ChangeSignal)>;

    /// Current sorted disabled-webhooks mask and a one-shot change signal.
    /// An absent mask is reported as an empty list, never an error.
    async fn watch_disabled_webhooks(&self) -> Result<(Vec<String>, ChangeSignal)>;

    /// Attempt to claim exclusive ownership of `resource` under `namespace`.
    /// Fails with `Error::ClaimedByOthers` if another actor already holds it.
    /// The claim is ephemeral, tied to `actor_id`'s coordination session.
    async fn claim_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()>;

    /// Release a held claim. Idempotent — releasing an unclaimed or
    /// already-released resource is not an error.
    async fn release_resource(
        &self,
        actor_id: &str,
        namespace: ResourceNamespace,
        resource: &str,
    ) -> Result<()>;

    /// Read-through lookup of a webhook resource's cluster/topic/endpoints.
    async fn webhook_info(&self, resource: &str) -> Result<Option<WebhookInfo>>;
}
