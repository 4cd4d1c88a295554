use std::time::Duration;

use actor_common::retry::RetryPolicy;
use reqwest::{Client, StatusCode};
use tracing::warn;

use crate::error::DeliveryError;

const ENDPOINT_RETRY_ATTEMPTS: u32 = 3;

/// POSTs one delivered message to every endpoint of a webhook resource in
/// parallel. Grounded on `hook-worker::worker::send_webhook`'s
/// retry/backoff/status-classification shape, generalized from one
/// job-queue row to N endpoints per message.
pub struct Dispatcher {
    client: Client,
    retry_policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to construct reqwest client for webhook dispatcher");
        Self {
            client,
            retry_policy: RetryPolicy::new(2, Duration::from_millis(100), Some(Duration::from_secs(5))),
        }
    }

    /// Deliver `body` to every endpoint. Returns the endpoints whose
    /// delivery exhausted its retry budget — the caller parks those to
    /// hinted handoff; every other endpoint succeeded or failed
    /// non-retryably (and is logged, not parked — a 4xx response is not
    /// something replay will fix).
    pub async fn dispatch(&self, endpoints: &[String], body: &[u8]) -> Vec<String> {
        let outcomes = futures::future::join_all(
            endpoints.iter().map(|endpoint| self.deliver_with_retry(endpoint, body)),
        )
        .await;

        endpoints
            .iter()
            .cloned()
            .zip(outcomes)
            .filter_map(|(endpoint, exhausted)| exhausted.then_some(endpoint))
            .collect()
    }

    /// Returns `true` if the retry budget was exhausted (caller should
    /// park to hinted handoff), `false` if delivered or non-retryably failed.
    async fn deliver_with_retry(&self, endpoint: &str, body: &[u8]) -> bool {
        for attempt in 0..ENDPOINT_RETRY_ATTEMPTS {
            match self.deliver_once(endpoint, body).await {
                Ok(()) => return false,
                Err(DeliveryError::NonRetryable(e)) => {
                    warn!(endpoint, error = %e, "non-retryable delivery failure, not parking");
                    return false;
                }
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "retryable delivery failure");
                    if attempt + 1 == ENDPOINT_RETRY_ATTEMPTS {
                        return true;
                    }
                    let retry_after = match &e {
                        DeliveryError::Retryable { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let wait = self.retry_policy.time_until_next_retry(attempt, retry_after);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        true
    }

    async fn deliver_once(&self, endpoint: &str, body: &[u8]) -> Result<(), DeliveryError> {
        let url: reqwest::Url = endpoint.parse()?;
        let response = self
            .client
            .post(url)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Retryable {
                error: e,
                retry_after: None,
            })?;

        let retry_after = parse_retry_after_header(response.headers());
        match response.error_for_status() {
            Ok(_) => Ok(()),
            Err(err) => {
                if is_retryable_status(err.status().expect("status code is set on a response error")) {
                    Err(DeliveryError::Retryable {
                        error: err,
                        retry_after,
                    })
                } else {
                    Err(DeliveryError::NonRetryable(err))
                }
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn parse_retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let parsed = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = chrono::DateTime::<chrono::Utc>::from(parsed) - chrono::Utc::now();
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_include_429_and_5xx() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn non_retryable_statuses_exclude_4xx_other_than_429() {
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(parse_retry_after_header(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_header_absent_returns_none() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after_header(&headers), None);
    }
}
