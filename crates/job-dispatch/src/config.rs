use actor_common::config::EnvMsDuration;
use envconfig::Envconfig;

/// Job-dispatch executor tuning. One instance of this config is shared by
/// every claimed job-queue topic this actor runs.
#[derive(Envconfig, Clone)]
pub struct JobDispatchConfig {
    /// Tick cadence for the due-job poll; §4.D gives a 1s floor as adequate.
    #[envconfig(from = "JOB_DISPATCH_TICK_MS", default = "1000")]
    pub tick_interval: EnvMsDuration,

    #[envconfig(from = "JOB_DISPATCH_DUE_JOBS_LIMIT", default = "100")]
    pub due_jobs_limit: i64,

    /// Topic version passed to `Manager::kafka_topic` when resolving a
    /// job queue's real broker topic.
    #[envconfig(from = "JOB_DISPATCH_TOPIC_VERSION", default = "1")]
    pub topic_version: u32,
}
