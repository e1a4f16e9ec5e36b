//! Backup Manager variants.
//!
//! [`DatabaseEngine`] is the capability every engine implements; [`Engine`]
//! is the closed set of engines; [`BackupManager`] binds one engine to the
//! shared collaborators (tool runner, upload dispatcher, retry policy,
//! compression settings) and exposes the caller-facing lifecycle.

pub mod db2;
pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod sqlite;

use crate::backup::command::{CommandRunner, SystemCommandRunner};
use crate::backup::compress::compress_file;
use crate::backup::compress::xz::XzConfig;
use crate::backup::crypto::{encrypt_file, EncryptionKey};
use crate::backup::execution::run_blocking;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::pipeline::{run_backup, BackupReport, BackupTarget, PipelineOptions, StageContext};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{chain_cleanup, Result};
use crate::backup::retry::RetryPolicy;
use crate::backup::upload::CloudDispatcher;
use derive_more::Display;
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

static VALIDATION_NAMESPACE_PREFIX: &str = "backup_validate_";

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub enum DatabaseKind {
    #[display("mysql")]
    Mysql,
    #[display("postgres")]
    Postgres,
    #[display("mongo")]
    Mongo,
    #[display("redis")]
    Redis,
    #[display("sqlite")]
    Sqlite,
    #[display("db2")]
    Db2,
}

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 6] = [
        DatabaseKind::Mysql,
        DatabaseKind::Postgres,
        DatabaseKind::Mongo,
        DatabaseKind::Redis,
        DatabaseKind::Sqlite,
        DatabaseKind::Db2,
    ];

    /// File-based engines identify the source by path alone.
    pub fn is_file_based(&self) -> bool {
        matches!(self, DatabaseKind::Sqlite)
    }
}

impl FromStr for DatabaseKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DatabaseKind::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Unsupported database type: '{s}'. Use one of {}",
                    DatabaseKind::ALL.iter().join(", ")
                ))
            })
    }
}

/// What every engine provides to the pipeline.
///
/// `file_ext` names the raw dump's extension.
pub trait DatabaseEngine: FileExtProvider + Send {
    fn kind(&self) -> DatabaseKind;

    /// Checks the source is reachable and remembers it. Missing target fields or a
    /// refusing engine fail with `Connection`.
    fn connect(&mut self, target: &BackupTarget) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Refuses to work on an engine that cannot run at all.
    fn ensure_supported(&self) -> Result<()> {
        Ok(())
    }

    fn require_connected(&self) -> Result<()> {
        self.ensure_supported()?;
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Base name for artifacts of the connected source.
    fn artifact_stem(&self) -> String;

    /// Writes a raw dump to `dst` and returns the file actually produced.
    fn dump(&mut self, dst: &Path) -> Result<PathBuf>;

    /// Checks that `path` restores cleanly. Corruption is a `Validation` error.
    fn validate(&self, path: &Path) -> Result<bool>;

    /// Releases the connection handle. Safe to call when not connected.
    fn close(&mut self) -> Result<()>;
}

/// Missing fields are a connection failure at this level; the pipeline
/// entry point reports the same condition as `InvalidArgument` up front.
pub(crate) fn require_target(target: &BackupTarget, kind: DatabaseKind) -> Result<()> {
    let missing = target.missing_fields(kind.is_file_based());
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::connection(format!(
            "{} requires {}",
            kind,
            missing.iter().join(", ")
        )))
    }
}

/// A dump must exist and be non-empty before any engine check runs.
pub(crate) fn require_dump_file(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(md) if md.is_file() && md.len() > 0 => Ok(()),
        Ok(_) => Err(Error::validation(format!(
            "backup file {:?} is empty",
            path
        ))),
        Err(e) => Err(Error::validation(format!(
            "backup file {:?} is missing: {}",
            path, e
        ))),
    }
}

/// A throwaway database that a validation restore writes into.
///
/// The drop action runs exactly once, through [`release`](Self::release) or,
/// on any early exit, when the guard goes out of scope.
pub struct ValidationNamespace<'a> {
    name: String,
    drop_action: Option<Box<dyn FnOnce(&str) -> Result<()> + 'a>>,
}

impl<'a> ValidationNamespace<'a> {
    pub fn new<F>(drop_action: F) -> Self
    where
        F: FnOnce(&str) -> Result<()> + 'a,
    {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("{}{}", VALIDATION_NAMESPACE_PREFIX, &id[..8]),
            drop_action: Some(Box::new(drop_action)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drops the namespace now and reports whether that worked.
    pub fn release(mut self) -> Result<()> {
        match self.drop_action.take() {
            Some(drop_action) => drop_action(&self.name),
            None => Ok(()),
        }
    }
}

impl Drop for ValidationNamespace<'_> {
    fn drop(&mut self) {
        if let Some(drop_action) = self.drop_action.take() {
            if let Err(e) = drop_action(&self.name) {
                tracing::warn!("Cannot drop validation namespace {}: {e}", self.name);
            }
        }
    }
}

/// Runs `restore` into a fresh throwaway namespace and always drops it.
/// A drop failure is reported after the restore's own error.
pub(crate) fn with_validation_namespace<D, R>(drop_action: D, restore: R) -> Result<bool>
where
    D: FnOnce(&str) -> Result<()>,
    R: FnOnce(&str) -> Result<()>,
{
    let namespace = ValidationNamespace::new(drop_action);
    tracing::debug!("Restoring into throwaway namespace {}", namespace.name());
    let res = restore(namespace.name());
    chain_cleanup(res, namespace.release().err().into_iter().collect()).map(|_| true)
}

/// The closed set of engines, each carrying its own connection state.
pub enum Engine {
    Mysql(mysql::MysqlEngine),
    Postgres(postgres::PostgresEngine),
    Mongo(mongo::MongoEngine),
    Redis(redis::RedisEngine),
    Sqlite(sqlite::SqliteEngine),
    Db2(db2::Db2Engine),
}

impl Engine {
    pub fn new(kind: DatabaseKind, runner: Arc<dyn CommandRunner>) -> Self {
        match kind {
            DatabaseKind::Mysql => Engine::Mysql(mysql::MysqlEngine::new(runner)),
            DatabaseKind::Postgres => Engine::Postgres(postgres::PostgresEngine),
            DatabaseKind::Mongo => Engine::Mongo(mongo::MongoEngine::new(runner)),
            DatabaseKind::Redis => Engine::Redis(redis::RedisEngine::new(runner)),
            DatabaseKind::Sqlite => Engine::Sqlite(sqlite::SqliteEngine::default()),
            DatabaseKind::Db2 => Engine::Db2(db2::Db2Engine::new(runner)),
        }
    }

    pub fn as_dyn(&self) -> &dyn DatabaseEngine {
        match self {
            Engine::Mysql(e) => e,
            Engine::Postgres(e) => e,
            Engine::Mongo(e) => e,
            Engine::Redis(e) => e,
            Engine::Sqlite(e) => e,
            Engine::Db2(e) => e,
        }
    }

    pub fn as_dyn_mut(&mut self) -> &mut dyn DatabaseEngine {
        match self {
            Engine::Mysql(e) => e,
            Engine::Postgres(e) => e,
            Engine::Mongo(e) => e,
            Engine::Redis(e) => e,
            Engine::Sqlite(e) => e,
            Engine::Db2(e) => e,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Disconnected,
    Connected,
}

/// One engine plus the collaborators its pipeline runs with.
///
/// A manager holds at most one connection. Reconnecting closes the previous
/// one first.
pub struct BackupManager {
    engine: Engine,
    runner: Arc<dyn CommandRunner>,
    dispatcher: CloudDispatcher,
    retry: RetryPolicy,
    xz: XzConfig,
}

impl BackupManager {
    pub fn new(kind: DatabaseKind) -> Self {
        Self::with_parts(
            kind,
            Arc::new(SystemCommandRunner),
            CloudDispatcher::default(),
            RetryPolicy::default(),
            XzConfig::default(),
        )
    }

    pub fn with_parts(
        kind: DatabaseKind,
        runner: Arc<dyn CommandRunner>,
        dispatcher: CloudDispatcher,
        retry: RetryPolicy,
        xz: XzConfig,
    ) -> Self {
        Self {
            engine: Engine::new(kind, runner.clone()),
            runner,
            dispatcher,
            retry,
            xz,
        }
    }

    /// A disconnected manager of the same kind with the same collaborators.
    pub fn detached(&self) -> Self {
        Self::with_parts(
            self.kind(),
            self.runner.clone(),
            self.dispatcher.clone(),
            self.retry,
            self.xz.clone(),
        )
    }

    pub fn kind(&self) -> DatabaseKind {
        self.engine.as_dyn().kind()
    }

    pub fn state(&self) -> ManagerState {
        if self.engine.as_dyn().is_connected() {
            ManagerState::Connected
        } else {
            ManagerState::Disconnected
        }
    }

    pub fn connect(&mut self, target: &BackupTarget) -> Result<()> {
        let engine = self.engine.as_dyn_mut();
        engine.ensure_supported()?;
        if engine.is_connected() {
            tracing::warn!("Closing previous {} connection before reconnecting", engine.kind());
            engine.close()?;
        }
        engine.connect(target)?;
        tracing::info!("Connected to {} database {:?}", engine.kind(), target.database());
        Ok(())
    }

    /// Runs dump → validate → compress → [encrypt] → [upload] on the
    /// connected source.
    pub fn backup(&mut self, options: &PipelineOptions) -> Result<BackupReport> {
        let ctx = StageContext {
            xz: &self.xz,
            dispatcher: &self.dispatcher,
        };
        run_backup(self.engine.as_dyn_mut(), options, ctx)
    }

    pub fn validate(&self, path: &Path) -> Result<bool> {
        let engine = self.engine.as_dyn();
        engine.ensure_supported()?;
        engine.validate(path)
    }

    pub fn compress(&self, path: &Path) -> Result<PathBuf> {
        self.engine.as_dyn().ensure_supported()?;
        compress_file(path, &self.xz)
    }

    pub fn encrypt(&self, path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
        self.engine.as_dyn().ensure_supported()?;
        encrypt_file(path, key)
    }

    pub fn close(&mut self) -> Result<()> {
        let engine = self.engine.as_dyn_mut();
        if engine.is_connected() {
            tracing::debug!("Closing {} connection", engine.kind());
        }
        engine.close()
    }

    /// Connects, backs up and closes, retrying the whole sequence.
    ///
    /// Options and target are checked once before the first attempt; a bad
    /// request fails with `InvalidArgument` and is never retried. The
    /// connection is closed after every attempt.
    pub fn perform_pipeline(
        &mut self,
        target: &BackupTarget,
        options: &PipelineOptions,
    ) -> Result<BackupReport> {
        self.engine.as_dyn().ensure_supported()?;
        options.check()?;
        target.check(self.kind().is_file_based())?;

        let retry = self.retry;
        let what = format!("{} backup pipeline", self.kind());
        retry.retry(&what, |attempt| {
            tracing::info!("{what}: attempt {attempt}");
            let res = self.connect(target).and_then(|_| self.backup(options));
            chain_cleanup(res, self.close().err().into_iter().collect())
        })
    }

    /// [`perform_pipeline`](Self::perform_pipeline) on a blocking worker, run
    /// by a fresh disconnected copy of this manager.
    pub async fn perform_pipeline_async(
        &self,
        target: BackupTarget,
        options: PipelineOptions,
    ) -> Result<BackupReport> {
        let mut manager = self.detached();
        run_blocking(move || manager.perform_pipeline(&target, &options)).await
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Closing {} connection on drop failed: {e}", self.kind());
        }
    }
}
