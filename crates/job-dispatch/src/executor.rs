use std::sync::Arc;

use async_trait::async_trait;
use controller::Executor;
use store::{Broker, JobStore, Manager};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::JobDispatchConfig;

/// One instance per claimed JobQueue topic: polls due jobs, publishes them
/// to the broker, archives them. See §4.D for the full ordering and
/// idempotence contract.
pub struct JobDispatchExecutor {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    manager: Arc<dyn Manager>,
    actor_short_id: String,
    config: JobDispatchConfig,
}

impl JobDispatchExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        manager: Arc<dyn Manager>,
        actor_short_id: String,
        config: JobDispatchConfig,
    ) -> Self {
        Self {
            store,
            broker,
            manager,
            actor_short_id,
            config,
        }
    }

    /// One poll-dispatch-archive pass over `topic`'s due jobs, in the
    /// `(due_time, job_id)` order the store already returns them in.
    pub(crate) async fn dispatch_due(&self, topic: &str) {
        let due = match self.store.due_jobs(topic, self.config.due_jobs_limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(topic, error = %e, "due_jobs query failed, retrying next tick");
                return;
            }
        };

        for job in due {
            let cluster = match self.manager.lookup_cluster(&job.app_id).await {
                Ok(Some(cluster)) => cluster,
                Ok(None) => {
                    warn!(app_id = %job.app_id, "no owning cluster, leaving job for retry");
                    continue;
                }
                Err(e) => {
                    warn!(app_id = %job.app_id, error = %e, "cluster lookup failed, leaving job for retry");
                    continue;
                }
            };
            let broker_topic = match self
                .manager
                .kafka_topic(&job.app_id, topic, self.config.topic_version)
                .await
            {
                Ok(name) => name,
                Err(e) => {
                    warn!(app_id = %job.app_id, error = %e, "topic resolution failed, leaving job for retry");
                    continue;
                }
            };

            match self
                .broker
                .sync_pub(&cluster, &broker_topic, job.app_id.as_bytes(), &job.payload)
                .await
            {
                Ok(_) => {
                    metrics::counter!("job_dispatch_published_total", "topic" => topic.to_string())
                        .increment(1);
                    match self.store.archive(&job.app_id, topic, &job, &self.actor_short_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(job_id = job.job_id, "job row already gone, another actor won the race");
                        }
                        Err(e) => {
                            warn!(job_id = job.job_id, error = %e, "archive failed, job will redispatch next tick");
                        }
                    }
                }
                Err(e) => {
                    warn!(app_id = %job.app_id, topic = %broker_topic, error = %e, "publish failed, leaving job for retry");
                }
            }
        }
    }
}

#[async_trait]
impl Executor for JobDispatchExecutor {
    async fn run(&self, resource: String, stopper: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval.0);
        loop {
            tokio::select! {
                _ = stopper.cancelled() => {
                    info!(topic = %resource, "job-dispatch executor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.dispatch_due(&resource).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_common::config::EnvMsDuration;
    use std::time::Duration;
    use store::{InMemoryBroker, InMemoryJobStore, InMemoryManager};

    fn test_config() -> JobDispatchConfig {
        JobDispatchConfig {
            tick_interval: EnvMsDuration(Duration::from_millis(1000)),
            due_jobs_limit: 10,
            topic_version: 1,
        }
    }

    #[tokio::test]
    async fn publishes_and_archives_a_due_job() {
        let store = InMemoryJobStore::new();
        let broker = InMemoryBroker::new();
        let manager = InMemoryManager::new();
        manager.set_cluster("app1", "cluster-a").await;

        store.create_job_queue("app1", "orders").await.unwrap();
        store
            .add("app1", "orders", b"payload".to_vec(), chrono::Duration::seconds(-1))
            .await
            .unwrap();

        let executor = JobDispatchExecutor::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            Arc::new(manager),
            "host:abc123".to_string(),
            test_config(),
        );

        executor.dispatch_due("orders").await;

        assert!(store.due_jobs("orders", 10).await.unwrap().is_empty());
        assert_eq!(store.history().await.len(), 1);
        assert_eq!(broker.depth("cluster-a", "app1.orders.v1").await, 1);
    }

    #[tokio::test]
    async fn leaves_job_in_place_when_no_owning_cluster() {
        let store = InMemoryJobStore::new();
        let broker = InMemoryBroker::new();
        let manager = InMemoryManager::new();
        // No cluster registered for "app1".

        store.create_job_queue("app1", "orders").await.unwrap();
        store
            .add("app1", "orders", b"payload".to_vec(), chrono::Duration::seconds(-1))
            .await
            .unwrap();

        let executor = JobDispatchExecutor::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            Arc::new(manager),
            "host:abc123".to_string(),
            test_config(),
        );

        executor.dispatch_due("orders").await;

        assert_eq!(store.due_jobs("orders", 10).await.unwrap().len(), 1);
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn leaves_job_in_place_when_publish_fails() {
        let store = InMemoryJobStore::new();
        let broker = InMemoryBroker::new();
        let manager = InMemoryManager::new();
        manager.set_cluster("app1", "cluster-a").await;
        broker.mark_invalid("cluster-a", "app1.orders.v1").await;

        store.create_job_queue("app1", "orders").await.unwrap();
        store
            .add("app1", "orders", b"payload".to_vec(), chrono::Duration::seconds(-1))
            .await
            .unwrap();

        let executor = JobDispatchExecutor::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            Arc::new(manager),
            "host:abc123".to_string(),
            test_config(),
        );

        executor.dispatch_due("orders").await;

        assert_eq!(store.due_jobs("orders", 10).await.unwrap().len(), 1);
        assert!(store.history().await.is_empty());
    }
}
