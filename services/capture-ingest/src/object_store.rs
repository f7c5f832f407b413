use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, TimeZone};
use tracing::{debug, info, instrument, warn};

pub const CONTENT_TYPE_XML: &str = "application/xml";
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";

/// Keyed blob storage. Puts overwrite, so re-uploading the same key is safe.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}

/// Date folder partitioning a day's captures: `ddMMyyyy` of the ingestion day.
pub fn date_prefix<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%d%m%Y").to_string()
}

/// Object key for an FTP file: `{date_prefix}/{original-filename}`
pub fn object_key(date_prefix: &str, file_name: &str) -> String {
    format!("{date_prefix}/{file_name}")
}

/// Get content type for a capture artifact
pub fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".xml") {
        CONTENT_TYPE_XML
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        CONTENT_TYPE_JPEG
    } else {
        "application/octet-stream"
    }
}

/// S3 / MinIO backed object store for one bucket
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3ObjectStore {
    /// Create a new store for `bucket`
    pub async fn new(config: &S3Config, bucket: &str) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(5 * 1024 * 1024),
        })
    }

    /// Same client and connection pool, different bucket
    pub fn with_bucket(&self, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ..self.clone()
        }
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload for large files. A failed upload is aborted so its
    /// parts do not linger in the bucket.
    async fn multipart_upload(&self, key: &str, body: &[u8], content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        if let Err(e) = self.upload_parts(key, upload_id, body).await {
            self.abort_multipart_upload(key, upload_id).await;
            return Err(e);
        }
        Ok(())
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, body: &[u8]) -> Result<()> {
        let mut completed_parts = Vec::new();
        for (index, chunk) in body.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => debug!(key = %key, upload_id = %upload_id, "Multipart upload aborted"),
            Err(e) => warn!(
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload"
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        debug!(key = %key, content_type = %content_type, "Uploading object");

        let size = body.len();
        if size > self.multipart_threshold_bytes {
            self.multipart_upload(key, &body, content_type).await?;
        } else {
            self.simple_upload(key, body, content_type).await?;
        }

        metrics::counter!("capture.uploads.bytes").increment(size as u64);
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to fetch object from S3")?;

        let body = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;

        Ok(body.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_sdk_s3::config::{Credentials, Region};
    use chrono::{Local, Utc};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal S3 endpoint: starts multipart uploads, rejects every part
    /// and records the request line of each call.
    async fn failing_part_endpoint() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head).to_string();
                let line = head.lines().next().unwrap_or_default().to_string();
                seen.lock().unwrap().push(line.clone());

                let (status, body) = if line.starts_with("POST") {
                    (
                        "200 OK",
                        "<InitiateMultipartUploadResult><Bucket>anpr</Bucket><Key>big.jpeg</Key>\
                         <UploadId>UPLOAD-1</UploadId></InitiateMultipartUploadResult>",
                    )
                } else if line.starts_with("PUT") {
                    (
                        "500 Internal Server Error",
                        "<Error><Code>InternalError</Code><Message>disk full</Message></Error>",
                    )
                } else {
                    ("204 No Content", "")
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/xml\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), requests)
    }

    fn local_store(endpoint: &str) -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .credentials_provider(Credentials::new("minio", "minio123", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .build();

        S3ObjectStore {
            client: S3Client::from_conf(config),
            bucket: "anpr".to_string(),
            multipart_threshold_bytes: 4,
            part_size_bytes: 8,
        }
    }

    #[tokio::test]
    async fn test_failed_multipart_upload_is_aborted() {
        let (endpoint, requests) = failing_part_endpoint().await;
        let store = local_store(&endpoint);

        let result = store
            .put_object("big.jpeg", vec![7u8; 20], CONTENT_TYPE_JPEG)
            .await;
        assert!(result.is_err());

        let requests = requests.lock().unwrap().clone();
        assert!(requests[0].starts_with("POST /anpr/big.jpeg"), "{requests:?}");
        assert!(requests[1].starts_with("PUT /anpr/big.jpeg"), "{requests:?}");
        let last = requests.last().unwrap();
        assert!(last.starts_with("DELETE /anpr/big.jpeg"), "{requests:?}");
        assert!(last.contains("uploadId=UPLOAD-1"), "{requests:?}");
        assert!(!requests.iter().any(|r| r.contains("uploadId=UPLOAD-1") && r.starts_with("POST")));
    }

    #[test]
    fn test_date_prefix_is_day_month_year() {
        let now = Utc.with_ymd_and_hms(2025, 12, 3, 23, 59, 0).unwrap();
        assert_eq!(date_prefix(&now), "03122025");

        let local = Local.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap();
        assert_eq!(date_prefix(&local), "09012026");
    }

    #[test]
    fn test_object_key_keeps_original_name() {
        assert_eq!(
            object_key("03122025", "1764569194214.xml.plate.jpg"),
            "03122025/1764569194214.xml.plate.jpg"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("123.xml"), "application/xml");
        assert_eq!(content_type_for("123.XML"), "application/xml");
        assert_eq!(content_type_for("123.xml.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("123.xml.plate.JPG"), "image/jpeg");
        assert_eq!(content_type_for("123.bin"), "application/octet-stream");
    }
}
