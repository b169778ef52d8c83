use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::presigning::PresigningConfig;
use s3::primitives::ByteStream;
use s3::types::ServerSideEncryption;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::SpacesConfig;
use crate::errors::StorageError;

/// One object as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object storage used for backup artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the file with server-side encryption and returns the etag.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<Option<String>, StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StorageError>;

    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;

    /// Streams the object into `destination`; returns bytes written.
    async fn download_to(&self, key: &str, destination: &Path) -> Result<u64, StorageError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Bucket the keys live in, when the backend has one.
    fn bucket(&self) -> Option<&str> {
        None
    }
}

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String), StorageError> {
    let invalid = |reason: &str| StorageError::S3Sdk(format!("{}: {}", reason, s3_uri));
    let uri = url::Url::parse(s3_uri).map_err(|_| invalid("Invalid S3 URI format"))?;
    if uri.scheme() != "s3" {
        return Err(invalid("S3 URI must start with s3://"));
    }
    let bucket = uri
        .host_str()
        .ok_or_else(|| invalid("S3 URI missing bucket name"))?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(invalid("S3 URI missing key (object path)"));
    }
    Ok((bucket, key))
}

fn sdk_error<E: std::fmt::Display>(context: &str, e: E) -> StorageError {
    StorageError::S3Sdk(format!("{}: {}", context, e))
}

fn to_chrono(dt: &s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// S3-compatible store (AWS S3, DigitalOcean Spaces, MinIO).
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &spaces_config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // Non-AWS endpoints generally expect path-style addressing.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(spaces_config.endpoint_url.is_some())
            .build();
        tracing::debug!(
            bucket = %spaces_config.bucket_name,
            endpoint = spaces_config.endpoint_url.as_deref().unwrap_or("aws"),
            "object store client configured"
        );
        Self {
            client: s3::Client::from_conf(s3_config),
            bucket: spaces_config.bucket_name.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<Option<String>, StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| sdk_error(&format!("Failed to create ByteStream from file {}", path.display()), e))?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type("application/sql")
            .server_side_encryption(ServerSideEncryption::Aes256)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| {
                sdk_error(
                    &format!("Failed to upload to bucket {} with key {}", self.bucket, key),
                    s3::error::DisplayErrorContext(e),
                )
            })?;

        tracing::info!(bucket = %self.bucket, key, "object uploaded");
        Ok(output.e_tag().map(|t| t.trim_matches('"').to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| sdk_error("Failed to list objects", s3::error::DisplayErrorContext(e)))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(StoredObject {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    etag: object.e_tag().map(|t| t.trim_matches('"').to_string()),
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(StoredObject {
                key: key.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                etag: output.e_tag().map(|t| t.trim_matches('"').to_string()),
                last_modified: output.last_modified().and_then(to_chrono),
            })),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(None)
                } else {
                    Err(sdk_error(&format!("Failed to stat {}", key), service))
                }
            }
        }
    }

    async fn download_to(&self, key: &str, destination: &Path) -> Result<u64, StorageError> {
        let mut object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(object) => object,
            Err(e) => {
                let service = e.into_service_error();
                return Err(if service.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    sdk_error(&format!("Failed to get object s3://{}/{}", self.bucket, key), service)
                });
            }
        };

        let mut output_file = File::create(destination).await?;
        let mut total_bytes_downloaded = 0u64;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| sdk_error(&format!("Failed to read body of {}", key), e))?
        {
            output_file.write_all(&bytes_chunk).await?;
            total_bytes_downloaded += bytes_chunk.len() as u64;
        }
        output_file.flush().await?;

        tracing::info!(
            key,
            bytes = total_bytes_downloaded,
            destination = %destination.display(),
            "object downloaded"
        );
        Ok(total_bytes_downloaded)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to delete {}", key), s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| sdk_error("Invalid presign expiry", e))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| sdk_error(&format!("Failed to presign {}", key), s3::error::DisplayErrorContext(e)))?;
        Ok(request.uri().to_string())
    }
}
