use std::future::ready;
use std::sync::Arc;

use actor_common::domain::ActorRecord;
use actor_common::health::HealthRegistry;
use actor_common::metrics::{serve, setup_metrics_router};
use actor_common::{Actor, ResourceNamespace};
use axum::routing::get;
use axum::Router;
use controller::RebalanceLoop;
use coordination::{CoordinationClient, EtcdCoordinationClient, EtcdCoordinationClientConfig};
use envconfig::Envconfig;
use job_dispatch::JobDispatchExecutor;
use store::{Broker, HttpManager, JobStore, Manager, PgJobStore, RdKafkaBroker};
use tokio_util::sync::CancellationToken;
use tracing::info;
use webhook_executor::WebhookExecutor;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("invalid configuration");
    let actor = Actor::generate();
    info!(actor = %actor, "starting actord");

    let coordination: Arc<dyn CoordinationClient> = Arc::new(
        EtcdCoordinationClient::connect(EtcdCoordinationClientConfig {
            endpoints: config.coordination.endpoints.0.clone(),
            prefix: config.coordination.prefix.clone(),
            session_ttl_seconds: config.coordination.session_ttl_seconds,
            keepalive_interval: config.coordination.keepalive_interval(),
        })
        .await?,
    );

    // Published once at startup; this actor's claimed-resource counts are
    // not tracked here, so the N fields start at zero rather than drifting
    // stale across the process lifetime.
    let actor_record = ActorRecord {
        addr: config.bind(),
        version: 1,
        actor_n: 0,
        job_queue_n: 0,
        webhook_n: 0,
        job_executor_n: 0,
        webhook_executor_n: 0,
    };
    let actor_record_json =
        serde_json::to_string(&actor_record).expect("ActorRecord serialization cannot fail");
    coordination.register_actor(actor.id(), &actor_record_json).await?;

    let job_store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::connect(&config.job_store.shard_urls.0, &config.job_store.lookup_url).await?,
    );
    let broker: Arc<dyn Broker> = Arc::new(RdKafkaBroker::new(
        config.broker.clusters.0.clone(),
        config.broker.message_timeout_ms,
    ));
    let manager: Arc<dyn Manager> = Arc::new(HttpManager::new(config.manager.base_url.clone()));

    let liveness = HealthRegistry::new("liveness");

    let quit = CancellationToken::new();

    let job_dispatch_executor = Arc::new(JobDispatchExecutor::new(
        Arc::clone(&job_store),
        Arc::clone(&broker),
        Arc::clone(&manager),
        actor.short_id().to_string(),
        config.job_dispatch.clone(),
    ));
    let job_dispatch_health = liveness
        .register("job-dispatch-controller".to_string(), time::Duration::seconds(60))
        .await;
    let job_dispatch_loop = RebalanceLoop::new(
        actor.id().to_string(),
        ResourceNamespace::JobQueue,
        Arc::clone(&coordination),
        job_dispatch_executor,
        quit.clone(),
    )
    .with_health(job_dispatch_health);

    let webhook_executor = Arc::new(WebhookExecutor::new(
        Arc::clone(&coordination),
        Arc::clone(&broker),
        actor.short_id().to_string(),
        config.webhook_executor.clone(),
    ));
    let webhook_health = liveness
        .register("webhook-controller".to_string(), time::Duration::seconds(60))
        .await;
    let webhook_loop = RebalanceLoop::new(
        actor.id().to_string(),
        ResourceNamespace::Webhook,
        Arc::clone(&coordination),
        webhook_executor,
        quit.clone(),
    )
    .with_health(webhook_health);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .merge(setup_metrics_router());
    let bind = config.bind();
    let metrics_quit = quit.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = metrics_quit.cancelled() => {}
            result = serve(router, &bind) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "metrics/health server exited");
                }
            }
        }
    });

    let mut job_dispatch_handle = tokio::spawn(job_dispatch_loop.run_forever());
    let mut webhook_handle = tokio::spawn(webhook_loop.run_forever());

    enum Trigger {
        JobDispatch,
        Webhook,
        Signal,
    }

    // Either dispatch loop terminating or the shutdown signal firing
    // collapses the whole process: there is exactly one shared quit token.
    let trigger = tokio::select! {
        _ = &mut job_dispatch_handle => Trigger::JobDispatch,
        _ = &mut webhook_handle => Trigger::Webhook,
        _ = tokio::signal::ctrl_c() => Trigger::Signal,
    };

    match trigger {
        Trigger::JobDispatch => info!("job-dispatch controller loop exited, shutting down process"),
        Trigger::Webhook => info!("webhook controller loop exited, shutting down process"),
        Trigger::Signal => info!("received shutdown signal"),
    }

    quit.cancel();
    if !matches!(trigger, Trigger::JobDispatch) {
        let _ = job_dispatch_handle.await;
    }
    if !matches!(trigger, Trigger::Webhook) {
        let _ = webhook_handle.await;
    }

    coordination.resign_actor(actor.id()).await.ok();

    Ok(())
}

pub async fn index() -> &'static str {
    "actord"
}
