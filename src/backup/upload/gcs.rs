//! Google Cloud Storage through `object_store`.
//!
//! With `gcs_credentials` set, that file (service account or authorized
//! user) is the only credential source. Otherwise the `GOOGLE_*`
//! environment is read, then application default credentials, then the GCE
//! metadata server.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::upload::{put_file, CloudUploader, PART_SIZE};
use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;

pub struct GcsUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl GcsUploader {
    /// Builds the client. A credentials file is read and parsed here, so a
    /// missing or malformed one fails before any upload.
    pub fn new(bucket: &str, credentials: Option<&Path>) -> Result<Self> {
        let builder = match credentials {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::invalid_argument(format!(
                        "gcs_credentials {:?} is not a file",
                        path
                    )));
                }
                GoogleCloudStorageBuilder::new()
                    .with_application_credentials(path.to_string_lossy().into_owned())
            }
            None => GoogleCloudStorageBuilder::from_env(),
        };
        let store = builder.with_bucket_name(bucket).build().map_err(|e| {
            Error::invalid_argument(format!("unusable GCS credentials for bucket {bucket}: {e}"))
        })?;
        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl CloudUploader for GcsUploader {
    async fn upload(&self, file: &Path, object_name: &str) -> Result<String> {
        put_file(self.store.clone(), file, object_name, PART_SIZE).await?;
        Ok(format!("gs://{}/{}", self.bucket, object_name))
    }

    fn name(&self) -> &'static str {
        "gcs"
    }
}
