use std::sync::Arc;
use std::time::Duration;

use actor_common::retry::RetryPolicy;
use store::Broker;
use tracing::{info, warn};

use crate::disk_queue::{DiskQueue, DiskQueueError};
use crate::error::FlusherError;

const FLUSHER_MAX_RETRIES: u32 = 5;
/// Dump the cursor after this many successful flushes, rather than after
/// every single one.
const DUMP_PER_BLOCKS: u64 = 20;

/// Drains a `DiskQueue` back onto the broker. Ported from `FlushInflights`:
/// a block that fails with a fatal-destination error is committed and
/// dropped rather than retried; a block that exhausts its retry budget is
/// rolled back (redelivered on the next `run`) and the error is surfaced to
/// the caller, which treats it as a non-fatal executor exit and retries the
/// claim on the next epoch.
pub struct Flusher {
    queue: Arc<DiskQueue>,
    broker: Arc<dyn Broker>,
    cluster: String,
    topic: String,
    retry_policy: RetryPolicy,
}

impl Flusher {
    pub fn new(queue: Arc<DiskQueue>, broker: Arc<dyn Broker>, cluster: String, topic: String) -> Self {
        Self {
            queue,
            broker,
            cluster,
            topic,
            retry_policy: RetryPolicy::new(2, Duration::from_millis(100), Some(Duration::from_secs(10))),
        }
    }

    /// Flush everything currently parked, dumping the cursor periodically
    /// and unconditionally on exit. Returns once the queue reports `Eoq`.
    pub async fn run(&self) -> Result<(), FlusherError> {
        let mut flushed_since_dump = 0u64;
        let result = self.drain(&mut flushed_since_dump).await;

        if let Err(e) = self.queue.dump_cursor().await {
            warn!(cluster = %self.cluster, topic = %self.topic, error = %e, "failed to dump cursor on flusher exit");
        }

        result
    }

    async fn drain(&self, flushed_since_dump: &mut u64) -> Result<(), FlusherError> {
        loop {
            let block = match self.queue.next().await {
                Ok(block) => block,
                Err(DiskQueueError::Eoq) => {
                    info!(cluster = %self.cluster, topic = %self.topic, "hinted-handoff queue drained");
                    return Ok(());
                }
                Err(e @ DiskQueueError::QueueNotOpen) => return Err(e.into()),
                Err(e) => return Err(e.into()),
            };

            match self.publish_with_retry(&block.key, &block.value).await {
                PublishOutcome::Delivered | PublishOutcome::FatalDestination => {
                    self.queue.commit().await?;
                    *flushed_since_dump += 1;
                    if *flushed_since_dump % DUMP_PER_BLOCKS == 0 {
                        self.queue.dump_cursor().await?;
                    }
                }
                PublishOutcome::RetriesExhausted(err) => {
                    self.queue.rollback().await?;
                    return Err(FlusherError::BrokerUnavailable(err));
                }
            }
        }
    }

    async fn publish_with_retry(&self, key: &[u8], value: &[u8]) -> PublishOutcome {
        for attempt in 0..FLUSHER_MAX_RETRIES {
            match self.broker.sync_pub(&self.cluster, &self.topic, key, value).await {
                Ok(_) => return PublishOutcome::Delivered,
                Err(e) if e.is_fatal_destination() => {
                    warn!(cluster = %self.cluster, topic = %self.topic, error = %e, "dropping handoff block, no valid destination");
                    return PublishOutcome::FatalDestination;
                }
                Err(e) => {
                    if attempt + 1 == FLUSHER_MAX_RETRIES {
                        return PublishOutcome::RetriesExhausted(e);
                    }
                    warn!(cluster = %self.cluster, topic = %self.topic, attempt, error = %e, "retrying handoff flush");
                    let wait = self.retry_policy.time_until_next_retry(attempt, None);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        unreachable!("loop always returns before exhausting FLUSHER_MAX_RETRIES iterations")
    }
}

enum PublishOutcome {
    Delivered,
    FatalDestination,
    RetriesExhausted(store::BrokerError),
}
