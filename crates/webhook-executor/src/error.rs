use std::time::Duration;

use thiserror::Error;

use crate::disk_queue::DiskQueueError;

/// Errors from dispatching one webhook body to one endpoint.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("error parsing endpoint url")]
    ParseUrlError(#[from] url::ParseError),
    #[error("endpoint delivery failed but can be retried: {error}")]
    Retryable {
        error: reqwest::Error,
        retry_after: Option<Duration>,
    },
    #[error("endpoint delivery failed and cannot be retried further: {0}")]
    NonRetryable(reqwest::Error),
}

/// Errors from draining a hinted-handoff queue back onto the broker.
#[derive(Error, Debug)]
pub enum FlusherError {
    #[error("disk queue error: {0}")]
    Queue(#[from] DiskQueueError),
    #[error("broker publish exhausted retries: {0}")]
    BrokerUnavailable(#[from] store::BrokerError),
}
