use serde::Deserialize;
use std::time::Duration;

use crate::services::retry::RetryPolicy;
use crate::services::worker::WorkerConfig;

/// Process configuration, read from the environment (and `.env` if present).
/// Both the gateway and the worker load the same struct.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address (e.g., "0.0.0.0:3000"). Unused by workers.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the result store
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the task queue
    pub redis_url: String,

    /// Key prefix of the task queue in Redis
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// AES-256-GCM key (base64, 32 bytes). Photos are stored in plaintext
    /// when unset.
    pub encryption_key: Option<String>,

    /// Gateway endpoint receiving pushed results. Pull-only when unset.
    pub notify_url: Option<String>,

    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,

    /// Must comfortably exceed worst-case inference latency.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_max_inference_attempts")]
    pub max_inference_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Attempts per blob upload/download before giving up.
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,

    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,

    #[serde(default = "default_lookup_backoff_ms")]
    pub lookup_backoff_ms: u64,

    /// Detections scoring below this are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Independent poll loops per worker process.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Optional Prometheus listener for worker processes.
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_queue_name() -> String {
    "photobot:jobs".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_max_messages() -> usize {
    1
}

fn default_poll_wait_secs() -> u64 {
    10
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

fn default_max_inference_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_upload_attempts() -> u32 {
    3
}

fn default_lookup_attempts() -> u32 {
    1
}

fn default_lookup_backoff_ms() -> u64 {
    200
}

fn default_min_confidence() -> f32 {
    0.25
}

fn default_worker_concurrency() -> usize {
    1
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn storage_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.upload_attempts, Duration::from_millis(250))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_messages: self.max_messages,
            poll_wait: Duration::from_secs(self.poll_wait_secs),
            visibility_timeout: self.visibility_timeout(),
            max_inference_attempts: self.max_inference_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            lookup_attempts: self.lookup_attempts,
            lookup_backoff: Duration::from_millis(self.lookup_backoff_ms),
        }
    }
}
