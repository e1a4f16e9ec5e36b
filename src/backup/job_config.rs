//! YAML job file for batch runs.
//!
//! ```yaml
//! retry:
//!   max_attempts: 5
//!   initial_backoff: 5s
//! compression:
//!   level: 6
//! jobs:
//!   - name: app-nightly
//!     database: mysql
//!     target: { host: db.internal, user: backup, password: secret, database: app }
//!     options: { destination_dir: /var/backups/app }
//! ```

use crate::backup::command::SystemCommandRunner;
use crate::backup::compress::xz::XzConfig;
use crate::backup::manager::{BackupManager, DatabaseKind};
use crate::backup::pipeline::{BackupTarget, PipelineOptions};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retry::RetryPolicy;
use crate::backup::upload::CloudDispatcher;
use crate::backup::validate::validate_valid_file_name;
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// One database to back up.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Job {
    #[validate(custom(function = validate_valid_file_name))]
    #[builder(into)]
    name: String,
    database: DatabaseKind,
    target: BackupTarget,
    #[validate(nested)]
    options: PipelineOptions,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_jobs))]
pub struct JobConfig {
    /// Applies to whole pipeline runs and to each upload
    #[validate(nested)]
    pub retry: Option<RetryPolicy>,
    #[validate(nested)]
    pub compression: Option<XzConfig>,
    #[validate(nested)]
    pub jobs: Vec<Job>,
}

fn validate_jobs(config: &JobConfig) -> std::result::Result<(), ValidationError> {
    if config.jobs.is_empty() {
        return Err(ValidationError::new("NoJobs").with_message("at least one job is required".into()));
    }
    let duplicates = config
        .jobs
        .iter()
        .map(|job| job.name.as_str())
        .duplicates()
        .join(", ");
    if !duplicates.is_empty() {
        return Err(ValidationError::new("DuplicateJobName")
            .with_message(format!("job names must be unique, repeated: {duplicates}").into()));
    }

    Ok(())
}

impl JobConfig {
    /// Reads and validates a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(Error::from)
            .add_msg(format!("Cannot open job file {:?}", path))?;
        Self::from_reader(file).add_msg(format!("Invalid job file {:?}", path))
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let config: JobConfig = serde_yml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.unwrap_or_default()
    }

    /// A manager wired to the real tools with this file's retry and
    /// compression settings.
    pub fn new_manager(&self, kind: DatabaseKind) -> BackupManager {
        let retry = self.retry_policy();
        BackupManager::with_parts(
            kind,
            Arc::new(SystemCommandRunner),
            CloudDispatcher::new(retry),
            retry,
            self.compression.clone().unwrap_or_default(),
        )
    }
}
