use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The two watched resource namespaces a rebalance loop can run over.
/// A third namespace (disabled webhooks) only ever masks the `Webhook`
/// namespace and never has its own executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceNamespace {
    JobQueue,
    Webhook,
}

impl ResourceNamespace {
    /// Coordination-path segment for the resource registry under this namespace.
    pub fn resources_path(&self) -> &'static str {
        match self {
            ResourceNamespace::JobQueue => "resources/jobqueues",
            ResourceNamespace::Webhook => "resources/webhooks",
        }
    }

    /// Coordination-path segment for claims under this namespace.
    pub fn owners_path(&self) -> &'static str {
        match self {
            ResourceNamespace::JobQueue => "owners/jobqueues",
            ResourceNamespace::Webhook => "owners/webhooks",
        }
    }
}

/// Immutable per-resource record for a webhook topic, fetched on demand
/// from the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookInfo {
    pub cluster: String,
    pub topic: String,
    pub endpoints: Vec<String>,
}

/// The output of the assignment function: every actor's sorted share.
/// Recomputed from scratch every epoch, never persisted.
pub type Assignment = BTreeMap<String, Vec<String>>;

/// A value that has an ephemeral presence in the coordination store and is
/// useful to log alongside audit output: membership records, this actor's
/// published advertisement, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRecord {
    pub addr: String,
    pub version: u32,
    #[serde(rename = "ActorN")]
    pub actor_n: u32,
    #[serde(rename = "JobQueueN")]
    pub job_queue_n: u32,
    #[serde(rename = "WebhookN")]
    pub webhook_n: u32,
    #[serde(rename = "JobExecutorN")]
    pub job_executor_n: u32,
    #[serde(rename = "WebhookExecutorN")]
    pub webhook_executor_n: u32,
}
