use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::upload::CloudUploader;
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::path::Path;

/// Amazon S3 through the ambient AWS credential chain.
///
/// Every put carries `ExpectedBucketOwner`, so a bucket that changed hands
/// rejects the upload instead of receiving the backup.
#[derive(Debug, Clone)]
pub struct S3Uploader {
    bucket: String,
    expected_owner: String,
}

impl S3Uploader {
    pub fn new(bucket: &str, expected_owner: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            expected_owner: expected_owner.to_string(),
        }
    }
}

#[async_trait]
impl CloudUploader for S3Uploader {
    async fn upload(&self, file: &Path, object_name: &str) -> Result<String> {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .load()
            .await;
        let client = s3::Client::new(&sdk_config);

        let body = ByteStream::from_path(file)
            .await
            .map_err(|e| Error::upload(format!("cannot read {:?}: {}", file, e)))?;

        client
            .put_object()
            .bucket(&self.bucket)
            .key(object_name)
            .expected_bucket_owner(&self.expected_owner)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::upload(format!(
                    "S3 put s3://{}/{} failed: {}",
                    self.bucket,
                    object_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(format!("s3://{}/{}", self.bucket, object_name))
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
