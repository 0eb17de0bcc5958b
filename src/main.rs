use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use photobot_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgRecordStore},
    routes,
    services::{
        encryption::EncryptedBlobStore, queue::RedisTaskQueue, storage::BlobStore,
        storage::S3BlobStore, submitter::Submitter,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing photobot gateway");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_submitted_total", "Photos accepted and enqueued");
    metrics::describe_counter!("results_delivered_total", "Pushed results forwarded to chats");
    metrics::describe_counter!(
        "failures_delivered_total",
        "Pushed failure notices forwarded to chats"
    );
    metrics::describe_gauge!("queue_depth", "Jobs waiting to be picked up by a worker");

    tracing::info!("Connecting to PostgreSQL result store");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");
    let records = Arc::new(PgRecordStore::new(db_pool));

    tracing::info!("Initializing R2 photo storage");
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
        tracing::info!("Encrypting photos at rest with AES-256-GCM");
        storage = Arc::new(
            EncryptedBlobStore::new(storage, key).expect("Failed to initialize encryption"),
        );
    }

    tracing::info!(queue = %config.queue_name, "Connecting to Redis task queue");
    let queue = Arc::new(
        RedisTaskQueue::connect(&config.redis_url, &config.queue_name, config.visibility_timeout())
            .await
            .expect("Failed to connect to task queue"),
    );

    let submitter = Submitter::new(storage, queue.clone());
    let state = AppState::new(submitter, records, queue);

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::MAX_UPLOAD_BYTES));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Gateway listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining connections");
}
