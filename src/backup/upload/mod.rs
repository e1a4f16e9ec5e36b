//! Cloud Upload Dispatcher.
//!
//! A provider tag plus a flat bag of credentials is resolved into an
//! [`UploadDescriptor`] up front; a missing field, an unusable connection
//! string or credentials file fails with `InvalidArgument` before any
//! database work or network traffic. [`CloudDispatcher`] then
//! routes the descriptor to its provider's [`CloudUploader`] and retries that
//! single call on its own, independent of any pipeline-level retry.

pub mod azure;
pub mod gcs;
pub mod minio;
pub mod s3;

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::retry::RetryPolicy;
use async_trait::async_trait;
use bon::Builder;
use derive_more::Display;
use getset::Getters;
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Buffer size of a streaming put; bigger files go up as multipart uploads
/// in parts of this size.
pub const PART_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudProvider {
    #[display("s3")]
    S3,
    #[display("azure")]
    Azure,
    #[display("gcs")]
    Gcs,
    #[display("minio")]
    Minio,
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(CloudProvider::S3),
            "azure" => Ok(CloudProvider::Azure),
            "gcs" => Ok(CloudProvider::Gcs),
            "minio" => Ok(CloudProvider::Minio),
            _ => Err(Error::invalid_argument(format!(
                "Unsupported cloud provider: '{s}'. Use one of s3, azure, gcs, minio"
            ))),
        }
    }
}

/// Provider credentials as the caller supplies them, one flat set of keys
/// for every provider. Only the keys of the selected provider are read.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ProviderCredentials {
    #[builder(into)]
    s3_bucket: Option<String>,
    #[builder(into)]
    s3_key: Option<String>,
    /// AWS account id the bucket must belong to
    #[builder(into)]
    s3_expected_owner: Option<String>,
    #[builder(into)]
    azure_conn_str: Option<RedactedString>,
    #[builder(into)]
    azure_container: Option<String>,
    #[builder(into)]
    azure_blob_name: Option<String>,
    #[builder(into)]
    gcs_bucket: Option<String>,
    #[builder(into)]
    gcs_blob_name: Option<String>,
    /// Service account or authorized user JSON file
    #[builder(into)]
    gcs_credentials: Option<PathBuf>,
    #[builder(into)]
    minio_endpoint: Option<String>,
    #[builder(into)]
    minio_access_key: Option<String>,
    #[builder(into)]
    minio_secret_key: Option<RedactedString>,
    #[builder(into)]
    minio_bucket: Option<String>,
    #[builder(into)]
    minio_object_name: Option<String>,
    /// Defaults to `true`
    minio_secure: Option<bool>,
}

/// A complete, provider-specific upload request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadDescriptor {
    S3 {
        bucket: String,
        key: Option<String>,
        expected_owner: String,
    },
    Azure {
        conn_str: RedactedString,
        container: String,
        blob_name: Option<String>,
    },
    Gcs {
        bucket: String,
        blob_name: Option<String>,
        credentials: Option<PathBuf>,
    },
    Minio {
        endpoint: String,
        access_key: String,
        secret_key: RedactedString,
        bucket: String,
        object_name: Option<String>,
        secure: bool,
    },
}

fn required(value: &Option<String>, key: &str, provider: CloudProvider) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::invalid_argument(format!(
            "{key} is required for {provider} uploads"
        ))),
    }
}

fn required_secret(
    value: &Option<RedactedString>,
    key: &str,
    provider: CloudProvider,
) -> Result<RedactedString> {
    match value {
        Some(v) if !v.is_blank() => Ok(v.clone()),
        _ => Err(Error::invalid_argument(format!(
            "{key} is required for {provider} uploads"
        ))),
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl UploadDescriptor {
    /// Checks that `credentials` holds everything `provider` needs, and
    /// that the Azure and GCS settings build a usable client.
    pub fn resolve(provider: CloudProvider, credentials: &ProviderCredentials) -> Result<Self> {
        let descriptor = Self::collect(provider, credentials)?;
        descriptor.check_client()?;
        Ok(descriptor)
    }

    fn collect(provider: CloudProvider, credentials: &ProviderCredentials) -> Result<Self> {
        let c = credentials;
        Ok(match provider {
            CloudProvider::S3 => UploadDescriptor::S3 {
                bucket: required(&c.s3_bucket, "s3_bucket", provider)?,
                key: optional(&c.s3_key),
                expected_owner: required(
                    &c.s3_expected_owner,
                    "s3_expected_owner (AWS account ID)",
                    provider,
                )?,
            },
            CloudProvider::Azure => UploadDescriptor::Azure {
                conn_str: required_secret(&c.azure_conn_str, "azure_conn_str", provider)?,
                container: required(&c.azure_container, "azure_container", provider)?,
                blob_name: optional(&c.azure_blob_name),
            },
            CloudProvider::Gcs => UploadDescriptor::Gcs {
                bucket: required(&c.gcs_bucket, "gcs_bucket", provider)?,
                blob_name: optional(&c.gcs_blob_name),
                credentials: c.gcs_credentials.clone(),
            },
            CloudProvider::Minio => UploadDescriptor::Minio {
                endpoint: required(&c.minio_endpoint, "minio_endpoint", provider)?,
                access_key: required(&c.minio_access_key, "minio_access_key", provider)?,
                secret_key: required_secret(&c.minio_secret_key, "minio_secret_key", provider)?,
                bucket: required(&c.minio_bucket, "minio_bucket", provider)?,
                object_name: optional(&c.minio_object_name),
                secure: c.minio_secure.unwrap_or(true),
            },
        })
    }

    fn check_client(&self) -> Result<()> {
        match self {
            UploadDescriptor::Azure {
                conn_str,
                container,
                blob_name,
            } => {
                azure::AzureUploader::new(conn_str, container)?;
                blob_name.as_deref().map(parse_object_path).transpose()?;
            }
            UploadDescriptor::Gcs {
                bucket,
                blob_name,
                credentials,
            } => {
                gcs::GcsUploader::new(bucket, credentials.as_deref())?;
                blob_name.as_deref().map(parse_object_path).transpose()?;
            }
            UploadDescriptor::S3 { .. } | UploadDescriptor::Minio { .. } => {}
        }
        Ok(())
    }

    /// Parses the provider tag, then resolves as [`resolve`](Self::resolve).
    pub fn from_tag(tag: &str, credentials: &ProviderCredentials) -> Result<Self> {
        Self::resolve(tag.parse()?, credentials)
    }

    pub fn provider(&self) -> CloudProvider {
        match self {
            UploadDescriptor::S3 { .. } => CloudProvider::S3,
            UploadDescriptor::Azure { .. } => CloudProvider::Azure,
            UploadDescriptor::Gcs { .. } => CloudProvider::Gcs,
            UploadDescriptor::Minio { .. } => CloudProvider::Minio,
        }
    }

    /// Remote object name, defaulting to the uploaded file's name.
    pub fn object_name(&self, file: &Path) -> Result<String> {
        let explicit = match self {
            UploadDescriptor::S3 { key, .. } => key,
            UploadDescriptor::Azure { blob_name, .. } => blob_name,
            UploadDescriptor::Gcs { blob_name, .. } => blob_name,
            UploadDescriptor::Minio { object_name, .. } => object_name,
        };
        match explicit {
            Some(name) => Ok(name.clone()),
            None => file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::invalid_argument(format!("{:?} has no file name to upload as", file))
                }),
        }
    }
}

fn parse_object_path(object_name: &str) -> Result<ObjectPath> {
    ObjectPath::parse(object_name)
        .map_err(|e| Error::invalid_argument(format!("invalid object name {object_name:?}: {e}")))
}

/// Streams `file` into `store` as `object_name` through a buffered writer:
/// a file smaller than `capacity` is a single put, anything larger a
/// multipart upload that is aborted if writing a part fails.
pub async fn put_file(
    store: Arc<dyn ObjectStore>,
    file: &Path,
    object_name: &str,
    capacity: usize,
) -> Result<()> {
    let location = parse_object_path(object_name)?;
    let mut source = tokio::fs::File::open(file)
        .await
        .map_err(|e| Error::upload(format!("cannot read {:?}: {}", file, e)))?;
    let mut writer = BufWriter::with_capacity(store, location, capacity);

    if let Err(e) = tokio::io::copy(&mut source, &mut writer).await {
        if let Err(abort) = writer.abort().await {
            tracing::warn!("Cannot abort upload of {object_name:?}: {abort}");
        }
        return Err(Error::upload(format!("cannot upload {:?}: {}", file, e)));
    }
    writer
        .shutdown()
        .await
        .map_err(|e| Error::upload(format!("cannot complete upload of {:?}: {}", file, e)))
}

/// One provider's upload primitive.
#[async_trait]
pub trait CloudUploader: Send + Sync {
    /// Uploads `file` as `object_name` and returns the remote location.
    async fn upload(&self, file: &Path, object_name: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

pub type UploaderFactory =
    Arc<dyn Fn(&UploadDescriptor) -> Result<Box<dyn CloudUploader>> + Send + Sync>;

/// Builds the real uploader for a descriptor.
pub fn default_uploader(descriptor: &UploadDescriptor) -> Result<Box<dyn CloudUploader>> {
    Ok(match descriptor {
        UploadDescriptor::S3 {
            bucket,
            expected_owner,
            ..
        } => Box::new(s3::S3Uploader::new(bucket, expected_owner)),
        UploadDescriptor::Azure {
            conn_str,
            container,
            ..
        } => Box::new(azure::AzureUploader::new(conn_str, container)?),
        UploadDescriptor::Gcs {
            bucket,
            credentials,
            ..
        } => Box::new(gcs::GcsUploader::new(bucket, credentials.as_deref())?),
        UploadDescriptor::Minio {
            endpoint,
            access_key,
            secret_key,
            bucket,
            secure,
            ..
        } => Box::new(minio::MinioUploader::new(
            endpoint, access_key, secret_key, bucket, *secure,
        )),
    })
}

/// Routes uploads to their provider, each call under its own retry budget.
#[derive(Clone)]
pub struct CloudDispatcher {
    retry: RetryPolicy,
    factory: UploaderFactory,
}

impl Default for CloudDispatcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Debug for CloudDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudDispatcher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CloudDispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_factory(retry, Arc::new(default_uploader))
    }

    pub fn with_factory(retry: RetryPolicy, factory: UploaderFactory) -> Self {
        Self { retry, factory }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Uploads `file` as described and returns the remote location.
    ///
    /// Blocks the calling thread on a private runtime, so it must not be
    /// called from inside an async task; use a blocking worker instead.
    pub fn dispatch(&self, file: &Path, descriptor: &UploadDescriptor) -> Result<String> {
        if !file.is_file() {
            return Err(Error::upload(format!("{:?} not found", file)));
        }
        let object_name = descriptor.object_name(file)?;
        let uploader = (self.factory)(descriptor)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::upload(format!("cannot start upload runtime: {e}")))?;

        tracing::info!(
            "Uploading {:?} to {} as {:?}",
            file,
            uploader.name(),
            object_name
        );
        let location = self
            .retry
            .retry(&format!("{} upload", descriptor.provider()), |_| {
                runtime
                    .block_on(uploader.upload(file, &object_name))
                    .map_err(|e| e.relabel(ErrorKind::Upload))
            })?;
        tracing::info!("Uploaded {:?} to {}", file, location);
        Ok(location)
    }
}
