use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use super::retry::RetryPolicy;

/// Key-addressed storage for uploaded photos.
///
/// Keys are opaque; callers never rely on overwrite semantics.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Returns [`StorageError::NotFound`] when no object exists under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Photo storage on an S3-compatible bucket (Cloudflare R2 in production).
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    retry: RetryPolicy,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket, retry })
    }

    async fn put_once(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, "application/octet-stream")
            .await
            .map_err(|e| classify_s3_error(key, e))?;
        check_status(key, response.status_code())
    }

    async fn get_once(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| classify_s3_error(key, e))?;
        check_status(key, response.status_code())?;
        Ok(response.bytes().to_vec())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.retry
            .run("blob_put", StorageError::is_transient, || self.put_once(key, data))
            .await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.retry
            .run("blob_get", StorageError::is_transient, || self.get_once(key))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| classify_s3_error(key, e))?;
        match check_status(key, response.status_code()) {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        code => Err(StorageError::Unavailable(format!(
            "bucket returned HTTP {} for {}",
            code, key
        ))),
    }
}

fn classify_s3_error(key: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("blob storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored payload is unreadable: {0}")]
    Corrupt(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
