pub mod config;
pub mod domain;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod retry;

pub use domain::{ActorRecord, Assignment, ResourceNamespace, WebhookInfo};
pub use identity::Actor;
