//! Simulates a slow downstream call (a webhook delivery, say) with a fixed
//! sleep per record. With `max_concurrent` bounding in-flight dispatch, this
//! demo's throughput is visibly capped by that setting rather than by how
//! fast records can be claimed.

use async_trait::async_trait;
use runtime_core::config::{Environment, LayeredConfig};
use runtime_core::handler::{Handler, HandlerContext, HandlerOutcome};
use runtime_core::identity::WorkerIdentity;
use runtime_core::record::FlowKind;
use runtime_core::retry::RetryPolicy;
use runtime_core::{AlertSink, CompositeSink, HandlerRegistry, TracingSink};
use runtime_postgres::{PgConnectionPool, PgHealthProbe, PgQueueProtocol};
use runtime_worker::{RecoveryController, RuntimeSettings, WorkerRuntime};
use std::sync::Arc;
use std::time::Duration;

const FLOW_KIND: &str = "concurrent-processing";

struct SimulatedWebhookDelivery;

#[async_trait]
impl Handler for SimulatedWebhookDelivery {
    async fn handle(&self, ctx: HandlerContext) -> HandlerOutcome {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                tracing::info!(record_id = %ctx.record.id, "delivered");
                HandlerOutcome::Success(None)
            }
            _ = ctx.cancellation.cancelled() => HandlerOutcome::Cancelled,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = LayeredConfig::new(
        Environment::from_env_var(&std::env::var("RUNTIME_ENV").unwrap_or_default()),
        FLOW_KIND,
    )
    .seed_from_process_env(true);

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new().connect(&database_url).await?;
    let retry_policy = RetryPolicy::from_config(&config)?;
    let queue = Arc::new(PgQueueProtocol::new(pool.clone(), retry_policy));
    let health_probe = Arc::new(PgHealthProbe::new(pool.clone(), "primary"));
    let connection_pool = Arc::new(PgConnectionPool::new(pool, 5));

    let identity = WorkerIdentity::resolve(FlowKind::new(FLOW_KIND), None);
    let handlers = HandlerRegistry::new().register(FLOW_KIND, Arc::new(SimulatedWebhookDelivery));
    let settings = RuntimeSettings::from_config(&config)?;
    let alert_sink: Arc<dyn AlertSink> = Arc::new(CompositeSink::new(vec![Box::new(TracingSink)]));

    use runtime_core::config::{keys, ConfigProvider};
    let queue_path = config.get(keys::LOCAL_QUEUE_PATH).unwrap_or_else(|| format!("./{FLOW_KIND}.local_queue.json"));
    let max_entries = config.get_u64(keys::LOCAL_QUEUE_MAX_ENTRIES, 1000)? as usize;
    let local_queue = runtime_local_queue::LocalOperationQueue::open(queue_path, max_entries)?;

    let recovery = Arc::new(RecoveryController::new(
        queue.clone(),
        FlowKind::new(FLOW_KIND),
        alert_sink.clone(),
        Duration::from_secs(settings.lease_duration_s as u64),
    ));
    recovery.startup().await;
    let _recovery_task = recovery.spawn_periodic();

    let mut runtime =
        WorkerRuntime::new(identity, queue, connection_pool, health_probe, handlers, settings, alert_sink, local_queue);

    let startup_health = runtime.health().await;
    tracing::info!(status = ?startup_health.status, "startup health report");

    let shutdown = tokio_util::sync::CancellationToken::new();
    let force = tokio_util::sync::CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });
    }

    let outcome = runtime.run(shutdown, force, Duration::from_secs(30)).await;
    std::process::exit(outcome.exit_code(runtime.local_queue_has_unflushed()));
}
