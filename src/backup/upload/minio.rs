use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::upload::CloudUploader;
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::fmt::{Debug, Formatter};
use std::path::Path;

/// MinIO ignores the region but the S3 signer needs one.
static MINIO_REGION: &str = "us-east-1";

/// Self-hosted MinIO through the S3 API, path-style addressing.
///
/// The bucket is created on first use.
#[derive(Clone)]
pub struct MinioUploader {
    endpoint_url: String,
    access_key: String,
    secret_key: RedactedString,
    bucket: String,
}

impl Debug for MinioUploader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinioUploader")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// `host:port` becomes `https://host:port` (or `http://` when not secure);
/// an explicit scheme is kept as given.
pub fn endpoint_url(endpoint: &str, secure: bool) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if secure {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

impl MinioUploader {
    pub fn new(
        endpoint: &str,
        access_key: &str,
        secret_key: &RedactedString,
        bucket: &str,
        secure: bool,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url(endpoint, secure),
            access_key: access_key.to_string(),
            secret_key: secret_key.clone(),
            bucket: bucket.to_string(),
        }
    }

    fn client(&self) -> s3::Client {
        let credentials = Credentials::new(
            &self.access_key,
            self.secret_key.inner(),
            None,
            None,
            "db_vault",
        );
        let config = s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(MINIO_REGION))
            .endpoint_url(&self.endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        s3::Client::from_conf(config)
    }

    async fn ensure_bucket(&self, client: &s3::Client) -> Result<()> {
        match client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false) =>
            {
                tracing::info!("Creating MinIO bucket {:?}", self.bucket);
                client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        Error::upload(format!(
                            "cannot create bucket {:?}: {}",
                            self.bucket,
                            DisplayErrorContext(&e)
                        ))
                    })
            }
            Err(e) => Err(Error::upload(format!(
                "cannot access bucket {:?} at {}: {}",
                self.bucket,
                self.endpoint_url,
                DisplayErrorContext(&e)
            ))),
        }
    }
}

#[async_trait]
impl CloudUploader for MinioUploader {
    async fn upload(&self, file: &Path, object_name: &str) -> Result<String> {
        let client = self.client();
        self.ensure_bucket(&client).await?;

        let body = ByteStream::from_path(file)
            .await
            .map_err(|e| Error::upload(format!("cannot read {:?}: {}", file, e)))?;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(object_name)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::upload(format!(
                    "MinIO put {}/{} failed: {}",
                    self.bucket,
                    object_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(format!("minio://{}/{}", self.bucket, object_name))
    }

    fn name(&self) -> &'static str {
        "minio"
    }
}
