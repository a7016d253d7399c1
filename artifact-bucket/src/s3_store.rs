//! S3 implementation of [`RemoteStore`].
//!
//! One client serves every target; the bucket comes from the [`Target`] on
//! each call and keys are prefixed with `Target::full_key`. SDK errors are
//! classified by HTTP status so the engine can tell "absent" from "failed".

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use artifact_bucket_core::config::Target;
use artifact_bucket_core::contract::{Listing, RemoteStore};
use artifact_bucket_core::error::{StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::{debug, info};

/// Connection settings for an S3-compatible store.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    /// Endpoint override (MinIO, LocalStack, ...); enables path-style addressing
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Retries after the initial attempt
    pub max_retries: Option<u32>,
    /// Total operation timeout, SDK retries included
    pub timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").finish_non_exhaustive()
    }
}

impl S3Store {
    /// Build a client from the ambient AWS configuration plus `settings`.
    pub async fn connect(settings: &S3Settings) -> StoreResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;
        if sdk_config.region().is_none() {
            return Err(StoreError::invalid_config(
                "no AWS region configured (set `region` or ARTIFACT_BUCKET_REGION)",
            ));
        }

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if let Some(retries) = settings.max_retries {
            builder = builder.retry_config(RetryConfig::standard().with_max_attempts(retries.saturating_add(1)));
        }
        if let Some(timeout_ms) = settings.timeout_ms {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_millis(timeout_ms))
                    .build(),
            );
        }

        info!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = ?sdk_config.region(),
            "S3 client configured"
        );
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn exists(&self, target: &Target, key: &str) -> StoreResult<bool> {
        let full_key = target.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&target.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.raw().status().as_u16() == 404 => Ok(false),
            Err(e) => Err(map_s3_error(e, &target.bucket, &full_key)),
        }
    }

    async fn metadata(&self, target: &Target, key: &str) -> StoreResult<HashMap<String, String>> {
        let full_key = target.full_key(key);
        let response = self
            .client
            .head_object()
            .bucket(&target.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_s3_error(e, &target.bucket, &full_key))?;
        Ok(response.metadata().cloned().unwrap_or_default())
    }

    async fn get(&self, target: &Target, key: &str) -> StoreResult<Vec<u8>> {
        let full_key = target.full_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&target.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_s3_error(e, &target.bucket, &full_key))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::transient(format!("Failed to read S3 body for '{full_key}': {e}")))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn put(
        &self,
        target: &Target,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StoreResult<()> {
        let full_key = target.full_key(key);
        debug!(bucket = %target.bucket, key = %full_key, bytes = body.len(), "S3 put_object");
        self.client
            .put_object()
            .bucket(&target.bucket)
            .key(&full_key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| map_s3_error(e, &target.bucket, &full_key))?;
        Ok(())
    }

    async fn delete(&self, target: &Target, key: &str) -> StoreResult<()> {
        let full_key = target.full_key(key);
        debug!(bucket = %target.bucket, key = %full_key, "S3 delete_object");
        self.client
            .delete_object()
            .bucket(&target.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_s3_error(e, &target.bucket, &full_key))?;
        Ok(())
    }

    async fn copy(
        &self,
        source: &Target,
        source_key: &str,
        destination: &Target,
        destination_key: &str,
    ) -> StoreResult<()> {
        let source_full = source.full_key(source_key);
        let destination_full = destination.full_key(destination_key);
        let copy_source = format!("{}/{}", source.bucket, encode_key(&source_full));
        debug!(source = %copy_source, bucket = %destination.bucket, key = %destination_full, "S3 copy_object");
        self.client
            .copy_object()
            .copy_source(copy_source)
            .bucket(&destination.bucket)
            .key(&destination_full)
            .send()
            .await
            .map_err(|e| map_s3_error(e, &destination.bucket, &destination_full))?;
        Ok(())
    }

    async fn list(&self, target: &Target, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing> {
        let full_prefix = target.full_key(prefix);
        let mut listing = Listing::default();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&target.bucket)
                .prefix(&full_prefix);
            if let Some(delimiter) = delimiter {
                request = request.delimiter(delimiter.to_string());
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_s3_error(e, &target.bucket, &full_prefix))?;

            listing.keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| target.relative_key(key))
                    .map(str::to_string),
            );
            listing.common_prefixes.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .filter_map(|p| target.relative_key(p))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(
            bucket = %target.bucket,
            prefix = %full_prefix,
            keys = listing.keys.len(),
            common_prefixes = listing.common_prefixes.len(),
            "S3 list_objects_v2"
        );
        Ok(listing)
    }
}

/// URL-encode a key for `x-amz-copy-source`, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Map an SDK error to [`StoreError`] by HTTP status.
fn map_s3_error<E: Debug>(err: SdkError<E>, bucket: &str, key: &str) -> StoreError {
    match &err {
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            match status {
                404 => StoreError::not_found(format!("s3://{bucket}/{key}")),
                401 | 403 => StoreError::forbidden(format!("Access denied for s3://{bucket}/{key} (HTTP {status})")),
                429 | 500 | 502 | 503 | 504 => {
                    StoreError::transient(format!("Retryable error for s3://{bucket}/{key} (HTTP {status})"))
                }
                _ => StoreError::other(format!("S3 error for s3://{bucket}/{key} (HTTP {status}): {err:?}")),
            }
        }
        SdkError::TimeoutError(_) => StoreError::transient(format!("S3 timeout for s3://{bucket}/{key}: {err:?}")),
        SdkError::DispatchFailure(_) => {
            StoreError::transient(format!("S3 connection error for s3://{bucket}/{key}: {err:?}"))
        }
        _ => StoreError::other(format!("S3 error for s3://{bucket}/{key}: {err:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_keeps_separators_and_escapes_segments() {
        assert_eq!(encode_key("@scope/pkg/-/pkg 1.0.tgz"), "%40scope/pkg/-/pkg%201.0.tgz");
        assert_eq!(encode_key("org/foo/bar/1.0/bar-1.0.jar"), "org/foo/bar/1.0/bar-1.0.jar");
    }
}
