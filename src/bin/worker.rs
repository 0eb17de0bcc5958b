use metrics_exporter_prometheus::PrometheusBuilder;
use photobot_pipeline::{
    config::AppConfig,
    db::{self, PgRecordStore},
    services::{
        detector::WorkersAiDetector,
        encryption::EncryptedBlobStore,
        notifier::{HttpNotifier, Notifier, PullOnlyNotifier},
        queue::RedisTaskQueue,
        storage::{BlobStore, S3BlobStore},
        worker::Worker,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting photo detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = config.worker_metrics_addr.as_deref() {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }
    metrics::describe_counter!("jobs_completed_total", "Jobs processed and acknowledged");
    metrics::describe_counter!(
        "jobs_replayed_total",
        "Redeliveries answered from an existing result"
    );
    metrics::describe_counter!("jobs_abandoned_total", "Jobs dropped after a terminal failure");
    metrics::describe_counter!("jobs_retried_total", "Deliveries returned to the queue");
    metrics::describe_counter!("notifications_failed_total", "Result pushes that failed");
    metrics::describe_counter!(
        "blobs_corrupt_total",
        "Stored photos that failed to decrypt or decode"
    );
    metrics::describe_histogram!("job_processing_seconds", "Time spent on one delivery");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing services");
    let r2 = S3BlobStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        config.storage_retry(),
    )
    .expect("Failed to initialize R2 client");
    let mut storage: Arc<dyn BlobStore> = Arc::new(r2);
    if let Some(key) = config.encryption_key.as_deref() {
        storage = Arc::new(
            EncryptedBlobStore::new(storage, key).expect("Failed to initialize encryption"),
        );
    }

    let queue = RedisTaskQueue::connect(
        &config.redis_url,
        &config.queue_name,
        config.visibility_timeout(),
    )
    .await
    .expect("Failed to connect to task queue");

    let detector = WorkersAiDetector::new(
        &config.cf_account_id,
        &config.cf_api_token,
        config.min_confidence,
    );

    let notifier: Arc<dyn Notifier> = match config.notify_url.as_deref() {
        Some(url) => {
            tracing::info!(url, "Pushing results to gateway");
            Arc::new(
                HttpNotifier::new(url, Duration::from_secs(config.notify_timeout_secs))
                    .expect("Failed to initialize notifier"),
            )
        }
        None => {
            tracing::info!("No NOTIFY_URL set, results are available by pull only");
            Arc::new(PullOnlyNotifier)
        }
    };

    let worker = Arc::new(Worker::new(
        Arc::new(queue),
        storage,
        Arc::new(PgRecordStore::new(db_pool)),
        Arc::new(detector),
        notifier,
        config.worker_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loops = JoinSet::new();
    for _ in 0..config.worker_concurrency.max(1) {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        loops.spawn(async move { worker.run(shutdown).await });
    }

    tracing::info!(
        concurrency = config.worker_concurrency.max(1),
        "Worker ready, polling for jobs"
    );

    wait_for_signal().await;
    tracing::info!("Shutdown requested, finishing in-flight jobs");
    let _ = shutdown_tx.send(true);

    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker loop panicked");
        }
    }
    tracing::info!("Worker stopped");
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
