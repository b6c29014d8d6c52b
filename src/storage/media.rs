//! Video blob storage using Cloudflare R2
//!
//! Uploads video files to R2 and resolves public URLs served via the R2
//! Custom Domain (CDN). Uploads stream in parts so progress can be reported
//! as each part lands; the access policy requires caller metadata on every
//! object, so uploads without it are not attempted.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use crate::config::BlobStoreConfig;
use crate::data::models::EntityId;
use crate::error::{EngineError, UploadFailure};

/// Storage-rule size ceiling (500 MB); mirrored client-side so an oversized
/// file fails before any bytes move
pub const STORAGE_CEILING_BYTES: u64 = 500 * 1024 * 1024;

/// Multipart part size; also the cutoff below which a single put is used
const PART_SIZE: u64 = 8 * 1024 * 1024;

/// Metadata the storage access policy requires on every object
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub user_id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Blob storage collaborator
///
/// `upload` streams a local file to the store and resolves the publicly
/// fetchable URL; progress lands on the provided watch channel as a
/// non-decreasing fraction in [0, 1].
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &UploadMetadata,
        progress: &watch::Sender<f64>,
    ) -> Result<String, UploadFailure>;

    /// Delete an object (used when its pin is deleted)
    async fn delete(&self, key: &str) -> Result<(), EngineError>;
}

/// Object key for a pin's video
///
/// Layout: `videos/{ownerId}/{pinId}.<ext>`
pub fn video_key(owner_id: &str, pin_id: &EntityId, content_type: &str) -> String {
    format!(
        "videos/{}/{}.{}",
        owner_id,
        pin_id,
        extension_for(content_type)
    )
}

/// Determine file extension from content type
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "bin",
    }
}

/// Video storage service backed by Cloudflare R2
pub struct S3BlobStore {
    /// S3-compatible client for R2
    client: S3Client,
    /// Video bucket name
    bucket: String,
    /// Public URL base (Custom Domain)
    public_url: String,
}

impl S3BlobStore {
    /// Create new blob storage client
    ///
    /// # Errors
    /// Returns error if S3 client initialization fails
    pub async fn new(config: &BlobStoreConfig) -> Result<Self, EngineError> {
        use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

        // R2 endpoint: https://{account_id}.r2.cloudflarestorage.com
        let endpoint = format!("https://{}.r2.cloudflarestorage.com", config.account_id);

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "pindrop-r2",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .http_client(super::build_r2_http_client())
            .build();

        let client = S3Client::from_conf(s3_config);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get public URL for an object key
    pub fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    /// Upload a small file in a single request
    async fn put_whole(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> Result<(), UploadFailure> {
        use aws_sdk_s3::primitives::ByteStream;

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| UploadFailure::Other(format!("could not read video file: {}", e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .cache_control("public, max-age=31536000") // 1 year
            .metadata("userId", &metadata.user_id)
            .metadata("deviceID", &metadata.device_id)
            .metadata("timestamp", metadata.timestamp.to_rfc3339())
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(())
    }

    /// Upload a large file part-by-part, reporting progress after each part
    async fn put_multipart(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &UploadMetadata,
        total_bytes: u64,
        progress: &watch::Sender<f64>,
    ) -> Result<(), UploadFailure> {
        use aws_sdk_s3::types::CompletedMultipartUpload;

        let multipart = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .cache_control("public, max-age=31536000")
            .metadata("userId", &metadata.user_id)
            .metadata("deviceID", &metadata.device_id)
            .metadata("timestamp", metadata.timestamp.to_rfc3339())
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let upload_id = multipart
            .upload_id()
            .ok_or_else(|| UploadFailure::Other("missing multipart upload id".to_string()))?
            .to_string();

        match self
            .upload_parts(key, source, &upload_id, total_bytes, progress)
            .await
        {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(classify_sdk_error)?;
                Ok(())
            }
            Err(failure) => {
                // Leave no orphaned parts behind
                if let Err(abort_error) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(key, error = ?abort_error, "Failed to abort multipart upload");
                }
                Err(failure)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        source: &Path,
        upload_id: &str,
        total_bytes: u64,
        progress: &watch::Sender<f64>,
    ) -> Result<Vec<aws_sdk_s3::types::CompletedPart>, UploadFailure> {
        use aws_sdk_s3::primitives::ByteStream;
        use aws_sdk_s3::types::CompletedPart;

        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| UploadFailure::Other(format!("could not open video file: {}", e)))?;

        let mut parts = Vec::new();
        let mut uploaded: u64 = 0;
        let mut part_number: i32 = 1;

        loop {
            let mut buffer = Vec::with_capacity(PART_SIZE as usize);
            let mut take = (&mut file).take(PART_SIZE);
            take.read_to_end(&mut buffer)
                .await
                .map_err(|e| UploadFailure::Other(format!("read failed: {}", e)))?;

            if buffer.is_empty() {
                break;
            }
            let chunk_len = buffer.len() as u64;

            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(classify_sdk_error)?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            uploaded += chunk_len;
            part_number += 1;
            // Monotonic by construction: uploaded only grows
            let fraction = (uploaded as f64 / total_bytes as f64).min(1.0);
            let _ = progress.send(fraction);

            if chunk_len < PART_SIZE {
                break;
            }
        }

        Ok(parts)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &UploadMetadata,
        progress: &watch::Sender<f64>,
    ) -> Result<String, UploadFailure> {
        let total_bytes = tokio::fs::metadata(source)
            .await
            .map_err(|e| UploadFailure::Other(format!("could not stat video file: {}", e)))?
            .len();

        if total_bytes > STORAGE_CEILING_BYTES {
            return Err(UploadFailure::TooLarge(total_bytes));
        }

        if total_bytes <= PART_SIZE {
            self.put_whole(key, source, content_type, metadata).await?;
            let _ = progress.send(1.0);
        } else {
            self.put_multipart(key, source, content_type, metadata, total_bytes, progress)
                .await?;
        }

        tracing::info!(key, bytes = total_bytes, "Video uploaded");
        Ok(self.public_url_for(key))
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EngineError::Storage(format!("R2 delete failed: {}", e)))?;

        Ok(())
    }
}

/// Map an SDK error onto the upload failure taxonomy
fn classify_sdk_error<E, R>(error: aws_sdk_s3::error::SdkError<E, R>) -> UploadFailure
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match error.as_service_error().and_then(|e| e.code()) {
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            UploadFailure::PermissionDenied
        }
        Some("QuotaExceeded") | Some("ServiceQuotaExceeded") => UploadFailure::Quota,
        _ => UploadFailure::Network(format!("{:?}", error)),
    }
}
