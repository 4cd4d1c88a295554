use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use actor_common::health::HealthHandle;
use actor_common::ResourceNamespace;
use coordination::{ChangeSignal, CoordinationClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::Executor;

const CLAIM_RETRY_ATTEMPTS: u32 = 3;
const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drives one namespace's WATCH/FILTER/DECIDE/SPAWN/WAIT/TEARDOWN cycle,
/// generic over the `Executor` it spawns so the same machinery runs both
/// the job-dispatch and the webhook rebalance loops.
pub struct RebalanceLoop<E: Executor> {
    actor_id: String,
    namespace: ResourceNamespace,
    coordination: Arc<dyn CoordinationClient>,
    executor: Arc<E>,
    quit: CancellationToken,
    health: Option<HealthHandle>,
}

struct Claimed {
    resource: String,
    handle: JoinHandle<()>,
}

enum WaitResult {
    Quit,
    ActorsChanged,
    ResourcesChanged,
    DisabledChanged,
}

impl<E: Executor> RebalanceLoop<E> {
    pub fn new(
        actor_id: String,
        namespace: ResourceNamespace,
        coordination: Arc<dyn CoordinationClient>,
        executor: Arc<E>,
        quit: CancellationToken,
    ) -> Self {
        Self {
            actor_id,
            namespace,
            coordination,
            executor,
            quit,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthHandle) -> Self {
        self.health = Some(health);
        self
    }

    /// Runs until `quit` is cancelled. Never returns an error: watch
    /// failures are logged and retried after a short delay rather than
    /// torn down, matching "non-fatal executor exit" as applied one level
    /// up to watch establishment itself.
    pub async fn run_forever(self) {
        let RebalanceLoop {
            actor_id,
            namespace,
            coordination,
            executor,
            quit,
            health,
        } = self;

        while !quit.is_cancelled() {
            if let Some(h) = &health {
                h.report_healthy().await;
            }

            // WATCH
            let (actors, change_actors) = match coordination.watch_actors().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, namespace = ?namespace, "watch_actors failed, retrying");
                    if wait_or_quit(&quit).await {
                        break;
                    }
                    continue;
                }
            };
            let (resources, change_resources) = match coordination.watch_resources(namespace).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, namespace = ?namespace, "watch_resources failed, retrying");
                    if wait_or_quit(&quit).await {
                        break;
                    }
                    continue;
                }
            };
            let (disabled, change_disabled) = if namespace == ResourceNamespace::Webhook {
                match coordination.watch_disabled_webhooks().await {
                    Ok((list, signal)) => (list, Some(signal)),
                    Err(e) => {
                        warn!(error = %e, "watch_disabled_webhooks failed, retrying");
                        if wait_or_quit(&quit).await {
                            break;
                        }
                        continue;
                    }
                }
            } else {
                (Vec::new(), None)
            };

            // FILTER
            let disabled_set: HashSet<&String> = disabled.iter().collect();
            let active: Vec<String> = resources
                .into_iter()
                .filter(|r| !disabled_set.contains(r))
                .collect();

            // DECIDE
            let assignment = assignment::compute_assignment(&actors, &active);
            let mine = assignment::share_of(&assignment, &actor_id);
            info!(namespace = ?namespace, actor = %actor_id, share = mine.len(), "rebalance epoch decided share");
            metrics::counter!("rebalance_epoch_total", "namespace" => namespace_label(namespace)).increment(1);

            // SPAWN
            let epoch_stopper = quit.child_token();
            let mut claimed: Vec<Claimed> = Vec::new();
            for resource in mine {
                match claim_with_retry(&coordination, &actor_id, namespace, resource).await {
                    Ok(()) => {
                        metrics::counter!("coordination_claims_total", "namespace" => namespace_label(namespace)).increment(1);
                        let stopper = epoch_stopper.child_token();
                        let executor = Arc::clone(&executor);
                        let resource_owned = resource.clone();
                        let handle = tokio::spawn(async move {
                            executor.run(resource_owned, stopper).await;
                        });
                        claimed.push(Claimed {
                            resource: resource.clone(),
                            handle,
                        });
                    }
                    Err(e) => {
                        warn!(resource = %resource, error = %e, "giving up claim for this epoch");
                    }
                }
            }

            // WAIT
            let wait_result = wait_for_change(&quit, change_actors, change_resources, change_disabled).await;

            // TEARDOWN
            epoch_stopper.cancel();
            for c in claimed.drain(..) {
                let _ = c.handle.await;
                if let Err(e) = coordination
                    .release_resource(&actor_id, namespace, &c.resource)
                    .await
                {
                    warn!(resource = %c.resource, error = %e, "failed to release claim on teardown");
                }
            }

            match wait_result {
                WaitResult::Quit => break,
                WaitResult::ActorsChanged => {
                    match coordination.actor_registered(&actor_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(actor = %actor_id, "membership lost, re-registering");
                            if let Err(e) = coordination.register_actor(&actor_id, "").await {
                                warn!(error = %e, "re-registration failed, will retry next epoch");
                            }
                        }
                        Err(e) => warn!(error = %e, "actor_registered check failed"),
                    }
                }
                WaitResult::ResourcesChanged | WaitResult::DisabledChanged => {}
            }
        }
    }
}

async fn wait_or_quit(quit: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => false,
        _ = quit.cancelled() => true,
    }
}

async fn wait_for_change(
    quit: &CancellationToken,
    change_actors: ChangeSignal,
    change_resources: ChangeSignal,
    change_disabled: Option<ChangeSignal>,
) -> WaitResult {
    tokio::select! {
        _ = quit.cancelled() => WaitResult::Quit,
        _ = change_actors.changed() => WaitResult::ActorsChanged,
        _ = change_resources.changed() => WaitResult::ResourcesChanged,
        _ = wait_disabled(change_disabled) => WaitResult::DisabledChanged,
    }
}

async fn wait_disabled(signal: Option<ChangeSignal>) {
    match signal {
        Some(s) => s.changed().await,
        None => std::future::pending::<()>().await,
    }
}

async fn claim_with_retry(
    coordination: &Arc<dyn CoordinationClient>,
    actor_id: &str,
    namespace: ResourceNamespace,
    resource: &str,
) -> Result<(), coordination::error::Error> {
    let mut attempt = 0;
    loop {
        match coordination.claim_resource(actor_id, namespace, resource).await {
            Ok(()) => return Ok(()),
            Err(e @ coordination::error::Error::ClaimedByOthers(_)) => {
                attempt += 1;
                metrics::counter!("coordination_claim_contested_total", "namespace" => namespace_label(namespace)).increment(1);
                if attempt >= CLAIM_RETRY_ATTEMPTS {
                    return Err(e);
                }
                tokio::time::sleep(CLAIM_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn namespace_label(namespace: ResourceNamespace) -> &'static str {
    match namespace {
        ResourceNamespace::JobQueue => "jobqueue",
        ResourceNamespace::Webhook => "webhook",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_common::WebhookInfo;
    use coordination::InMemoryCoordinationClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    /// Records every resource it was asked to run and blocks until its
    /// stopper fires, so tests can assert what a SPAWN step claimed.
    struct RecordingExecutor {
        seen: AsyncMutex<Vec<String>>,
        runs: AtomicUsize,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: AsyncMutex::new(Vec::new()),
                runs: AtomicUsize::new(0),
            })
        }

        async fn seen(&self) -> Vec<String> {
            self.seen.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, resource: String, stopper: CancellationToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(resource);
            stopper.cancelled().await;
        }
    }

    #[tokio::test]
    async fn claims_its_share_and_tears_down_on_quit() {
        let coord = InMemoryCoordinationClient::new();
        coord.add_jobqueue_resource("q1").await;
        coord.add_jobqueue_resource("q2").await;
        coord.register_actor("actor-1", "{}").await.unwrap();

        let executor = RecordingExecutor::new();
        let quit = CancellationToken::new();
        let loop_ = RebalanceLoop::new(
            "actor-1".to_string(),
            ResourceNamespace::JobQueue,
            Arc::new(coord.clone()),
            Arc::clone(&executor),
            quit.clone(),
        );

        let handle = tokio::spawn(loop_.run_forever());

        // Give SPAWN a chance to run and claim both resources.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.seen().await.len(), 2);
        assert_eq!(
            coord.claim_owner(ResourceNamespace::JobQueue, "q1").await,
            Some("actor-1".to_string())
        );
        assert_eq!(
            coord.claim_owner(ResourceNamespace::JobQueue, "q2").await,
            Some("actor-1".to_string())
        );

        quit.cancel();
        handle.await.unwrap();

        assert_eq!(coord.claim_owner(ResourceNamespace::JobQueue, "q1").await, None);
        assert_eq!(coord.claim_owner(ResourceNamespace::JobQueue, "q2").await, None);
    }

    #[tokio::test]
    async fn webhook_loop_filters_disabled_resources() {
        let coord = InMemoryCoordinationClient::new();
        coord
            .add_webhook_resource(
                "w1",
                WebhookInfo {
                    cluster: "c1".to_string(),
                    topic: "t1".to_string(),
                    endpoints: vec!["http://example.invalid".to_string()],
                },
            )
            .await;
        coord
            .add_webhook_resource(
                "w2",
                WebhookInfo {
                    cluster: "c1".to_string(),
                    topic: "t2".to_string(),
                    endpoints: vec!["http://example.invalid".to_string()],
                },
            )
            .await;
        coord.disable_webhook("w2").await;
        coord.register_actor("actor-1", "{}").await.unwrap();

        let executor = RecordingExecutor::new();
        let quit = CancellationToken::new();
        let loop_ = RebalanceLoop::new(
            "actor-1".to_string(),
            ResourceNamespace::Webhook,
            Arc::new(coord.clone()),
            Arc::clone(&executor),
            quit.clone(),
        );

        let handle = tokio::spawn(loop_.run_forever());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executor.seen().await, vec!["w1".to_string()]);

        quit.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resigning_actor_loses_its_share_on_next_epoch() {
        let coord = InMemoryCoordinationClient::new();
        coord.add_jobqueue_resource("q1").await;
        coord.register_actor("actor-1", "{}").await.unwrap();
        coord.register_actor("actor-2", "{}").await.unwrap();

        let executor1 = RecordingExecutor::new();
        let executor2 = RecordingExecutor::new();
        let quit = CancellationToken::new();

        let loop1 = RebalanceLoop::new(
            "actor-1".to_string(),
            ResourceNamespace::JobQueue,
            Arc::new(coord.clone()),
            Arc::clone(&executor1),
            quit.clone(),
        );
        let loop2 = RebalanceLoop::new(
            "actor-2".to_string(),
            ResourceNamespace::JobQueue,
            Arc::new(coord.clone()),
            Arc::clone(&executor2),
            quit.clone(),
        );

        let h1 = tokio::spawn(loop1.run_forever());
        let h2 = tokio::spawn(loop2.run_forever());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // q1 sorts first among actors, round-robin by index assigns it to
        // whichever actor sorts first: actor-1.
        assert_eq!(executor1.seen().await, vec!["q1".to_string()]);
        assert!(executor2.seen().await.is_empty());

        quit.cancel();
        h1.await.unwrap();
        h2.await.unwrap();
    }
}
