use actor_common::config::EnvMsDuration;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct WebhookExecutorConfig {
    #[envconfig(from = "WEBHOOK_REQUEST_TIMEOUT_MS", default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "WEBHOOK_HINTED_HANDOFF_DIR", default = "/var/lib/actord/hh")]
    pub hinted_handoff_dir: String,

    #[envconfig(from = "WEBHOOK_FLUSH_INTERVAL_MS", default = "5000")]
    pub flush_interval: EnvMsDuration,

    #[envconfig(from = "WEBHOOK_DRAIN_TIMEOUT_MS", default = "30000")]
    pub drain_timeout: EnvMsDuration,
}
