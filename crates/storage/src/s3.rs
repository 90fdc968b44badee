//! S3 storage backend
//!
//! Maps the flat-key storage contract onto an S3-compatible bucket:
//! - one request per operation, no retries at this layer
//! - multipart uploads for large objects
//! - custom endpoint and static credentials (for MinIO, R2, LocalStack, etc.)

use std::ops::Range;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{retry::RetryConfig, Builder as S3ConfigBuilder, Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use tuner_core::config::{default_batch_concurrency, S3Config};
use tuner_core::{Error, Result};
use tracing::{debug, instrument, warn};

use crate::key::object_key;
use crate::listing::{FileGrouper, GlobPattern};
use crate::{FileGroup, StorageBackend};

/// Threshold for switching to multipart upload (5 MB)
const MULTIPART_THRESHOLD: usize = 5 * 1024 * 1024;

/// Part size for multipart uploads (5 MB minimum required by S3)
const MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// Region used when none is configured
const DEFAULT_REGION: &str = "us-east-1";

/// Name reported for statically configured credentials
const STATIC_CREDENTIALS_PROVIDER: &str = "tuner-config";

/// S3-compatible storage backend
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    list_scan_limit: Option<usize>,
    batch_concurrency: usize,
}

impl S3Storage {
    /// Create a new S3Storage with default AWS configuration
    ///
    /// Uses environment variables or instance profile for credentials.
    pub async fn new(bucket: impl Into<String>) -> Self {
        Self::with_config(S3Config {
            bucket: bucket.into(),
            ..Default::default()
        })
        .await
    }

    /// Create a new S3Storage with custom configuration
    pub async fn with_config(config: S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(effective_region(&config)))
            .load()
            .await;

        // Callers own retries; the SDK makes one attempt per request
        let mut s3_config_builder =
            S3ConfigBuilder::from(&aws_config).retry_config(RetryConfig::disabled());

        if let Some(endpoint) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            s3_config_builder = s3_config_builder.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                STATIC_CREDENTIALS_PROVIDER,
            ));
        }

        Self::from_client(Client::from_conf(s3_config_builder.build()), config)
    }

    /// Wrap an already configured client; endpoint and credential settings in
    /// `config` are ignored
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket,
            list_scan_limit: config.list_scan_limit,
            batch_concurrency: default_batch_concurrency(),
        }
    }

    /// Override the batch-write concurrency limit
    pub fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Perform multipart upload for large objects
    async fn multipart_upload(&self, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;

        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to initiate multipart upload: {}", e),
            })?;

        let upload_id = create_result.upload_id().ok_or_else(|| Error::Storage {
            message: "No upload_id returned".to_string(),
        })?;

        debug!(key, upload_id, size, "Started multipart upload");

        let mut completed_parts = Vec::new();
        for (index, range) in part_ranges(data.len(), MULTIPART_PART_SIZE).enumerate() {
            let part_number = index as i32 + 1;
            let result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice(range.clone())))
                .send()
                .await;

            match result {
                Ok(output) => {
                    completed_parts.push(
                        CompletedPart::builder()
                            .part_number(part_number)
                            .set_e_tag(output.e_tag().map(String::from))
                            .build(),
                    );
                    debug!(part_number, start = range.start, end = range.end, "Uploaded part");
                }
                Err(e) => {
                    self.abort_multipart_upload(key, upload_id).await;
                    return Err(Error::Storage {
                        message: format!("Failed to upload part {}: {}", part_number, e),
                    });
                }
            }
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        if let Err(e) = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
        {
            self.abort_multipart_upload(key, upload_id).await;
            return Err(Error::Storage {
                message: format!("Failed to complete multipart upload: {}", e),
            });
        }

        debug!(key, size, "Completed multipart upload");
        Ok(size)
    }

    /// Abort a multipart upload (best effort, for cleanup)
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, upload_id, error = %e, "Failed to abort multipart upload");
        }
    }
}

/// Region handed to the SDK
fn effective_region(config: &S3Config) -> String {
    config
        .region
        .clone()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Byte ranges of the parts of a multipart upload
fn part_ranges(len: usize, part_size: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(part_size)
        .map(move |start| start..std::cmp::min(start + part_size, len))
}

#[async_trait]
impl StorageBackend for S3Storage {
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn read(&self, path: &str) -> Result<Bytes> {
        let key = object_key(path)?;
        debug!(%key, "Reading from S3");

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if no_such_key {
                    Error::StoragePathNotFound {
                        path: path.to_string(),
                    }
                } else {
                    Error::Storage {
                        message: format!("S3 get_object failed: {}", e),
                    }
                }
            })?;

        let bytes = result.body.collect().await.map_err(|e| Error::Storage {
            message: format!("Failed to read S3 response body: {}", e),
        })?;

        Ok(bytes.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", bucket = %self.bucket, size = data.len()))]
    async fn write(&self, path: &str, data: Bytes) -> Result<u64> {
        let key = object_key(path)?;
        let size = data.len();
        debug!(%key, size, "Writing to S3");

        if size > MULTIPART_THRESHOLD {
            return self.multipart_upload(key, data).await;
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("S3 put_object failed: {}", e),
            })?;

        Ok(size as u64)
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn delete(&self, path: &str) -> Result<()> {
        let key = object_key(path)?;
        debug!(%key, "Deleting from S3");

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("S3 delete_object failed: {}", e),
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn exists(&self, path: &str) -> bool {
        let key = match object_key(path) {
            Ok(key) => key,
            Err(_) => return false,
        };

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                // Absent and unreachable look the same to callers
                debug!(%key, error = %e, "head_object failed, reporting absent");
                false
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        debug!(%prefix, "Listing S3 objects");

        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| Error::Storage {
                message: format!("S3 list_objects failed: {}", e),
            })?;

            results.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!(count = results.len(), "Found S3 objects");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn list_files(&self, pattern: &str) -> Result<Vec<FileGroup>> {
        let mut grouper = FileGrouper::new(GlobPattern::new(pattern)?);
        let mut continuation_token: Option<String> = None;
        let mut scanned = 0usize;

        // No prefix filter: the pattern is applied client-side to every key
        'pages: loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| Error::Storage {
                message: format!("S3 list_objects failed: {}", e),
            })?;

            for object in response.contents() {
                if let Some(limit) = self.list_scan_limit {
                    if scanned >= limit {
                        warn!(limit, "Glob listing stopped at scan limit");
                        break 'pages;
                    }
                }
                scanned += 1;
                if let Some(key) = object.key() {
                    grouper.push(key);
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(scanned, matched = grouper.matched(), "Glob listing finished");
        Ok(grouper.finish())
    }

    fn batch_concurrency(&self) -> usize {
        self.batch_concurrency
    }
}
