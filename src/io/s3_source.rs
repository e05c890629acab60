//! S3-backed frame source.
//!
//! Frames are stored as individual objects keyed by
//! `{prefix}{datastore_id}/{frame_set_id}/{frame_id}`. The object body is
//! streamed chunk by chunk so the parser can start work (and the service can
//! cancel the transfer) before the whole frame has arrived.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::source::{FrameId, FrameSource, FrameStream};
use crate::error::IoError;

/// S3-backed implementation of [`FrameSource`].
#[derive(Clone)]
pub struct S3FrameSource {
    client: Client,
    bucket: String,
    prefix: String,
    timeout: Duration,
}

impl S3FrameSource {
    /// Create a new source for the given bucket.
    ///
    /// `timeout` bounds the initial request and every subsequent body chunk.
    pub fn new(client: Client, bucket: String, prefix: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.unwrap_or_default(),
            timeout,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a frame.
    pub fn object_key(&self, id: &FrameId) -> String {
        format!(
            "{}{}/{}/{}",
            self.prefix, id.datastore_id, id.frame_set_id, id.frame_id
        )
    }
}

#[async_trait]
impl FrameSource for S3FrameSource {
    async fn open_frame(&self, id: &FrameId) -> Result<Box<dyn FrameStream>, IoError> {
        let key = self.object_key(id);
        debug!(bucket = %self.bucket, key = %key, "Fetching frame from S3");

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send();

        let output = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| IoError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);

                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if is_not_found || status_is_404 {
                    return IoError::NotFound(format!("s3://{}/{}", self.bucket, key));
                }

                IoError::S3(e.to_string())
            })?;

        Ok(Box::new(S3FrameStream {
            body: output.body,
            timeout: self.timeout,
        }))
    }
}

/// Body of an in-flight `GetObject` response.
struct S3FrameStream {
    body: ByteStream,
    timeout: Duration,
}

#[async_trait]
impl FrameStream for S3FrameStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, IoError> {
        match tokio::time::timeout(self.timeout, self.body.next()).await {
            Err(_) => Err(IoError::Timeout(self.timeout.as_millis() as u64)),
            Ok(None) => Ok(None),
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(IoError::Connection(e.to_string())),
        }
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
