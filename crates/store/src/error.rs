use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("request to manager failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected manager response: {0}")]
    UnexpectedResponse(String),
    #[error("app {0} has no owning cluster")]
    NoCluster(String),
}

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("no shard for app {0}")]
    NoShard(String),
    #[error("nothing deleted")]
    NothingDeleted,
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("unknown topic: {0}")]
    InvalidTopic(String),
    #[error("unknown cluster: {0}")]
    InvalidCluster(String),
    #[error("no brokers configured for cluster {0}")]
    EmptyBrokers(String),
    #[error("publish timed out")]
    Timeout,
    #[error("consumer gone")]
    ConsumerGone,
}

impl BrokerError {
    /// Whether this failure means the target has no valid destination at
    /// all (the webhook flusher commits-and-drops on these instead of
    /// retrying) versus a transient failure worth retrying.
    pub fn is_fatal_destination(&self) -> bool {
        matches!(self, BrokerError::InvalidTopic(_) | BrokerError::InvalidCluster(_))
    }
}
