pub mod broker;
pub mod error;
pub mod job_store;
pub mod manager;

pub use broker::{Broker, BrokerConsumer, BrokerDelivery, InMemoryBroker, RdKafkaBroker};
pub use error::{BrokerError, JobStoreError, ManagerError};
pub use job_store::{InMemoryJobStore, Job, JobStore, PgJobStore};
pub use manager::{HttpManager, InMemoryManager, Manager};
