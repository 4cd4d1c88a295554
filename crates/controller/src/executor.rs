use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Owns exactly one claimed resource for the lifetime of one rebalance
/// epoch. `run` must return promptly once `stopper` is cancelled; it may
/// also return early on its own (a non-fatal exit per §4.C) without that
/// triggering a rebalance — the claim is simply released and the resource
/// sits unclaimed until the next epoch's DECIDE picks it up again.
///
/// One `Executor` implementation per namespace: `job-dispatch` for
/// `ResourceNamespace::JobQueue`, `webhook-executor` for
/// `ResourceNamespace::Webhook`.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Start running against `resource`, observing `stopper` for teardown.
    async fn run(&self, resource: String, stopper: CancellationToken);
}
