//! Pipeline Orchestrator: one backup run through the fixed stage chain
//! dump → validate → compress → [encrypt] → [upload].
//!
//! Each stage consumes the previous stage's file. Everything lives in a
//! per-run [`ScratchDir`] until the final artifact is persisted, so a failed
//! run leaves nothing behind.

use crate::backup::compress::compress_file;
use crate::backup::compress::xz::XzConfig;
use crate::backup::crypto::{encrypt_file, validate_encryption_key, EncryptionKey};
use crate::backup::manager::DatabaseEngine;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::{chain_cleanup, Result};
use crate::backup::scratch::ScratchDir;
use crate::backup::upload::{CloudDispatcher, ProviderCredentials, UploadDescriptor};
use crate::backup::validate::validate_writable_dir;
use bon::Builder;
use chrono::Utc;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

pub use crate::backup::result_error::error::Stage;

/// Identifies the database to back up.
///
/// File-based engines only read `database` (a filesystem path); the other
/// fields are accepted and ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupTarget {
    #[serde(default)]
    #[builder(default, into)]
    host: String,
    #[serde(default)]
    #[builder(default, into)]
    user: String,
    #[serde(default)]
    #[builder(default, into)]
    password: RedactedString,
    /// Database name, or the database file path for file-based engines
    #[builder(into)]
    database: String,
}

impl BackupTarget {
    pub fn missing_fields(&self, file_based: bool) -> Vec<&'static str> {
        let mut missing = vec![];
        if !file_based {
            if self.host.trim().is_empty() {
                missing.push("host");
            }
            if self.user.trim().is_empty() {
                missing.push("user");
            }
            if self.password.is_blank() {
                missing.push("password");
            }
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }
        missing
    }

    /// Rejects an incomplete target with `InvalidArgument`.
    pub fn check(&self, file_based: bool) -> Result<()> {
        let missing = self.missing_fields(file_based);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "missing required target field(s): {}",
                missing.iter().join(", ")
            )))
        }
    }
}

/// Where a backup goes and how it is protected.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_has_destination))]
#[getset(get = "pub")]
pub struct PipelineOptions {
    /// Local directory receiving the final artifact, created if absent
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    destination_dir: Option<PathBuf>,
    /// Encrypt the compressed artifact when set
    #[validate(custom(function = validate_encryption_key))]
    #[builder(into)]
    encryption_key: Option<EncryptionKey>,
    /// `s3`, `azure`, `gcs` or `minio`
    #[builder(into)]
    cloud_provider: Option<String>,
    #[serde(default)]
    #[builder(default)]
    provider_credentials: ProviderCredentials,
}

fn validate_has_destination(options: &PipelineOptions) -> std::result::Result<(), ValidationError> {
    let has_provider = options
        .cloud_provider
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    if options.destination_dir.is_none() && !has_provider {
        return Err(ValidationError::new("MissingDestination").with_message(
            "Either destination_dir or cloud_provider (with credentials) required".into(),
        ));
    }

    Ok(())
}

impl PipelineOptions {
    /// Validates the options and resolves the upload request, if any.
    ///
    /// Fails with `InvalidArgument` and touches nothing but the destination
    /// directory, so it is safe to call before any database work.
    pub fn check(&self) -> Result<Option<UploadDescriptor>> {
        self.validate()?;
        match self.cloud_provider.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => {
                UploadDescriptor::from_tag(tag, &self.provider_credentials).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Outcome of a successful run.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct BackupReport {
    pub success: bool,
    /// Final local artifact
    pub artifact: PathBuf,
    /// Remote location when the artifact was uploaded
    pub remote: Option<String>,
}

/// Collaborators shared by every stage of a run.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub xz: &'a XzConfig,
    pub dispatcher: &'a CloudDispatcher,
}

/// Runs the stage chain against an already connected engine.
///
/// Options are checked first (`InvalidArgument`), then the connection
/// (`NotConnected`); neither creates any file. Every later failure carries
/// the stage that raised it.
pub fn run_backup(
    engine: &mut dyn DatabaseEngine,
    options: &PipelineOptions,
    ctx: StageContext<'_>,
) -> Result<BackupReport> {
    let upload = options.check()?;
    engine.require_connected()?;

    let mut scratch = ScratchDir::create(options.destination_dir().as_deref())?;
    match run_stages(engine, options, upload.as_ref(), &mut scratch, ctx) {
        Ok((artifact, remote)) => {
            let artifact = scratch.persist(&artifact)?;
            tracing::info!("Backup complete: {:?}", artifact);
            Ok(BackupReport {
                success: true,
                artifact,
                remote,
            })
        }
        Err(e) => chain_cleanup(Err(e), scratch.close().err().into_iter().collect()),
    }
}

fn run_stages(
    engine: &mut dyn DatabaseEngine,
    options: &PipelineOptions,
    upload: Option<&UploadDescriptor>,
    scratch: &mut ScratchDir,
    ctx: StageContext<'_>,
) -> Result<(PathBuf, Option<String>)> {
    let raw = scratch
        .reserve_artifact(&engine.artifact_stem(), engine.file_ext(), Utc::now())
        .map_err(|e| e.in_stage(Stage::Dump))?;

    tracing::info!("[{}] dumping {} backup", Stage::Dump, engine.kind());
    let dumped = engine
        .dump(&raw)
        .map_err(|e| e.relabel(ErrorKind::Backup).in_stage(Stage::Dump))?;

    tracing::info!("[{}] {:?}", Stage::Validate, dumped);
    validate_stage(engine, &dumped)?;

    tracing::info!("[{}] {:?}", Stage::Compress, dumped);
    let mut artifact = compress_file(&dumped, ctx.xz).map_err(|e| e.in_stage(Stage::Compress))?;

    if let Some(key) = options.encryption_key() {
        tracing::info!("[{}] {:?}", Stage::Encrypt, artifact);
        artifact = encrypt_file(&artifact, key).map_err(|e| e.in_stage(Stage::Encrypt))?;
    }

    let remote = match upload {
        Some(descriptor) => {
            tracing::info!("[{}] {:?} to {}", Stage::Upload, artifact, descriptor.provider());
            Some(
                ctx.dispatcher
                    .dispatch(&artifact, descriptor)
                    .map_err(|e| e.in_stage(Stage::Upload))?,
            )
        }
        None => None,
    };

    Ok((artifact, remote))
}

fn validate_stage(engine: &mut dyn DatabaseEngine, dumped: &Path) -> Result<()> {
    match engine.validate(dumped) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::validation(format!(
            "integrity check rejected {:?}",
            dumped
        ))),
        Err(e) => Err(e.relabel(ErrorKind::Validation)),
    }
    .map_err(|e| e.in_stage(Stage::Validate))
}
