use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use controller::Executor;
use coordination::CoordinationClient;
use store::{Broker, BrokerConsumer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WebhookExecutorConfig;
use crate::disk_queue::{Block, DiskQueue};
use crate::dispatch::Dispatcher;
use crate::flusher::Flusher;

/// One instance per claimed webhook topic. Wires a broker consumer, a
/// parallel per-endpoint dispatcher, and a hinted-handoff disk queue for
/// messages that exhaust their delivery budget. See §4.E for the full
/// state machine this implements.
pub struct WebhookExecutor {
    coordination: Arc<dyn CoordinationClient>,
    broker: Arc<dyn Broker>,
    actor_short_id: String,
    config: WebhookExecutorConfig,
}

impl WebhookExecutor {
    pub fn new(
        coordination: Arc<dyn CoordinationClient>,
        broker: Arc<dyn Broker>,
        actor_short_id: String,
        config: WebhookExecutorConfig,
    ) -> Self {
        Self {
            coordination,
            broker,
            actor_short_id,
            config,
        }
    }
}

#[async_trait]
impl Executor for WebhookExecutor {
    async fn run(&self, resource: String, stopper: CancellationToken) {
        let info = match self.coordination.webhook_info(&resource).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(resource = %resource, "no webhook info registered, releasing claim");
                return;
            }
            Err(e) => {
                warn!(resource = %resource, error = %e, "failed to fetch webhook info, releasing claim");
                return;
            }
        };

        // Deterministic per (actor, topic) so a re-created consumer after a
        // claim change resumes instead of re-reading from scratch.
        let group = format!("{}-{}", self.actor_short_id, info.topic);
        let consumer = match self.broker.consume(&info.cluster, &info.topic, &group).await {
            Ok(c) => c,
            Err(e) => {
                warn!(resource = %resource, error = %e, "failed to join consumer group, releasing claim");
                return;
            }
        };

        let queue_dir = Path::new(&self.config.hinted_handoff_dir)
            .join(&info.cluster)
            .join(&info.topic);
        let queue = match DiskQueue::open(&queue_dir).await {
            Ok(q) => Arc::new(q),
            Err(e) => {
                warn!(resource = %resource, error = %e, "failed to open hinted-handoff queue, releasing claim");
                return;
            }
        };

        let dispatcher = Dispatcher::new(self.config.request_timeout.0);
        let flusher = Flusher::new(
            Arc::clone(&queue),
            Arc::clone(&self.broker),
            info.cluster.clone(),
            info.topic.clone(),
        );

        self.drive(&resource, &info.endpoints, consumer.as_ref(), &dispatcher, &queue, &flusher, &stopper)
            .await;

        self.drain(&queue, &flusher).await;
        if let Err(e) = queue.close().await {
            warn!(resource = %resource, error = %e, "failed to close hinted-handoff queue cleanly");
        }
    }
}

impl WebhookExecutor {
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        resource: &str,
        endpoints: &[String],
        consumer: &dyn BrokerConsumer,
        dispatcher: &Dispatcher,
        queue: &Arc<DiskQueue>,
        flusher: &Flusher,
        stopper: &CancellationToken,
    ) {
        let mut flush_ticker = tokio::time::interval(self.config.flush_interval.0);
        loop {
            tokio::select! {
                _ = stopper.cancelled() => {
                    info!(resource = %resource, "webhook executor stopping");
                    return;
                }
                _ = flush_ticker.tick() => {
                    if let Err(e) = flusher.run().await {
                        warn!(resource = %resource, error = %e, "hinted-handoff flush failed");
                    }
                }
                delivery = consumer.recv() => {
                    match delivery {
                        Ok(delivery) => {
                            let parked = dispatcher.dispatch(endpoints, &delivery.value).await;
                            let parked_ok = if parked.is_empty() {
                                true
                            } else {
                                metrics::counter!("webhook_handoff_parked_total", "resource" => resource.to_string())
                                    .increment(1);
                                let block = Block {
                                    key: delivery.key.clone(),
                                    value: delivery.value.clone(),
                                };
                                match queue.push(&block).await {
                                    Ok(()) => true,
                                    Err(e) => {
                                        warn!(resource = %resource, error = %e, "failed to park delivery to hinted handoff");
                                        false
                                    }
                                }
                            };

                            // Offsets only advance once the message was either delivered or
                            // durably parked; a failed park must be redelivered, so stop
                            // here and let the controller respawn this executor.
                            if !parked_ok {
                                warn!(resource = %resource, "stopping executor after failed park to avoid advancing past an un-parked failure");
                                return;
                            }

                            if let Err(e) = consumer.store_offset(delivery.partition, delivery.offset) {
                                warn!(resource = %resource, error = %e, "failed to store consumer offset");
                            }
                        }
                        Err(e) => {
                            warn!(resource = %resource, error = %e, "consumer recv failed, stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Drain every inflight handoff block before the caller closes the
    /// queue, bounded by `drain_timeout` so a wedged broker cannot hang
    /// shutdown forever.
    async fn drain(&self, queue: &Arc<DiskQueue>, flusher: &Flusher) {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout.0;
        while queue.inflights() > 0 && tokio::time::Instant::now() < deadline {
            if flusher.run().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actor_common::config::EnvMsDuration;
    use actor_common::domain::WebhookInfo;
    use coordination::InMemoryCoordinationClient;
    use httpmock::MockServer;
    use store::InMemoryBroker;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn test_config(hh_dir: &std::path::Path) -> WebhookExecutorConfig {
        WebhookExecutorConfig {
            request_timeout: EnvMsDuration(Duration::from_millis(2000)),
            hinted_handoff_dir: hh_dir.to_string_lossy().to_string(),
            flush_interval: EnvMsDuration(Duration::from_millis(50)),
            drain_timeout: EnvMsDuration(Duration::from_millis(500)),
        }
    }

    #[tokio::test]
    async fn delivers_to_endpoint_and_commits_offset() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/hook");
            then.status(200);
        });

        let coordination = InMemoryCoordinationClient::new();
        coordination
            .add_webhook_resource(
                "app1:events",
                WebhookInfo {
                    cluster: "prod".to_string(),
                    topic: "events".to_string(),
                    endpoints: vec![server.url("/hook")],
                },
            )
            .await;

        let broker = InMemoryBroker::new();
        broker.sync_pub("prod", "events", b"k1", b"payload").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let executor = WebhookExecutor::new(
            Arc::new(coordination),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            "host-a".to_string(),
            test_config(dir.path()),
        );

        let quit = CancellationToken::new();
        let stopper = quit.child_token();
        let quit_after = quit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            quit_after.cancel();
        });

        executor.run("app1:events".to_string(), stopper).await;

        mock.assert();
        assert_eq!(broker.committed_offset("host-a-events").await, Some(0));
    }

    #[tokio::test]
    async fn parks_to_hinted_handoff_when_endpoint_keeps_failing() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/hook");
            then.status(500);
        });

        let coordination = InMemoryCoordinationClient::new();
        coordination
            .add_webhook_resource(
                "app1:events",
                WebhookInfo {
                    cluster: "prod".to_string(),
                    topic: "events".to_string(),
                    endpoints: vec![server.url("/hook")],
                },
            )
            .await;

        let broker = InMemoryBroker::new();
        broker.sync_pub("prod", "events", b"k1", b"payload").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = WebhookExecutorConfig {
            flush_interval: EnvMsDuration(Duration::from_secs(60)),
            ..test_config(dir.path())
        };
        let executor = WebhookExecutor::new(
            Arc::new(coordination),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            "host-a".to_string(),
            config,
        );

        let quit = CancellationToken::new();
        let stopper = quit.child_token();
        let quit_after = quit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            quit_after.cancel();
        });

        executor.run("app1:events".to_string(), stopper).await;

        assert!(mock.hits() >= 1);
        // Drain on shutdown republishes the parked block back onto the broker.
        assert_eq!(broker.depth("prod", "events").await, 2);
    }
}
