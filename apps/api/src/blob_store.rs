//! Uploaded roster images. The pipeline treats storage as an opaque blob store.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob upload failed: {0}")]
    Upload(String),

    #[error("Blob download failed: {0}")]
    Download(String),

    #[error("Blob delete failed: {0}")]
    Delete(String),

    #[error("Not a blob url for this store: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` for `venue_id` and returns the url to fetch them back.
    async fn upload(
        &self,
        bytes: Bytes,
        venue_id: Uuid,
        content_type: &str,
    ) -> Result<String, BlobError>;

    async fn download(&self, url: &str) -> Result<Bytes, BlobError>;

    async fn delete(&self, url: &str) -> Result<(), BlobError>;
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// `rosters/{venue_id}/{id}.{ext}`
pub fn object_key(venue_id: Uuid, id: Uuid, content_type: &str) -> String {
    format!("rosters/{venue_id}/{id}.{}", extension_for(content_type))
}

/// S3 / MinIO backed store. Urls have the form `s3://{bucket}/{key}`.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn key_from_url<'a>(&self, url: &'a str) -> Result<&'a str, BlobError> {
        let (bucket, key) = url
            .strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| BlobError::InvalidUrl(url.to_string()))?;
        if bucket != self.bucket || key.is_empty() {
            return Err(BlobError::InvalidUrl(url.to_string()));
        }
        Ok(key)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        venue_id: Uuid,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let key = object_key(venue_id, Uuid::new_v4(), content_type);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobError::Upload(e.to_string()))?;

        let url = format!("s3://{}/{}", self.bucket, key);
        info!("Uploaded roster image to {url}");
        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Bytes, BlobError> {
        let key = self.key_from_url(url)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Download(e.to_string()))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Download(e.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let key = self.key_from_url(url)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Delete(e.to_string()))?;
        info!("Deleted roster image {url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

    fn store() -> S3BlobStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .build();
        S3BlobStore::new(aws_sdk_s3::Client::from_conf(config), "rosters".to_string())
    }

    #[test]
    fn test_object_key_layout() {
        let venue = Uuid::nil();
        let id = Uuid::from_u128(1);
        assert_eq!(
            object_key(venue, id, "image/jpeg"),
            format!("rosters/{venue}/{id}.jpg")
        );
        assert!(object_key(venue, id, "application/pdf").ends_with(".bin"));
    }

    #[test]
    fn test_key_from_url_checks_bucket() {
        let s = store();
        assert_eq!(s.key_from_url("s3://rosters/rosters/v/a.png").unwrap(), "rosters/v/a.png");
        assert!(matches!(
            s.key_from_url("s3://other/rosters/v/a.png"),
            Err(BlobError::InvalidUrl(_))
        ));
        assert!(s.key_from_url("https://example.com/a.png").is_err());
        assert!(s.key_from_url("s3://rosters/").is_err());
    }
}
