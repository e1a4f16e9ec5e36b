use crate::backup::command::{run_checked, CommandRunner, CommandSpec, ExitCodePolicy};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::manager::{require_dump_file, require_target, DatabaseEngine, DatabaseKind};
use crate::backup::pipeline::BackupTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit code 1 from the `db2` CLP is a warning and is logged, not failed.
static CLP_POLICY: ExitCodePolicy = ExitCodePolicy::WarningsBelow(2);

/// IBM Db2 through the `db2` command line processor and `db2ckbkp`.
///
/// `BACKUP DATABASE` writes a timestamped image into a directory; the newest
/// image for the database is renamed to the requested dump path.
pub struct Db2Engine {
    runner: Arc<dyn CommandRunner>,
    session: Option<BackupTarget>,
}

impl Db2Engine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            session: None,
        }
    }

    fn clp(statement: String) -> CommandSpec {
        CommandSpec::builder()
            .program("db2")
            .args(vec![statement])
            .secret_args(vec![0])
            .build()
    }

    /// Newest image in `dir` whose name starts with the database name.
    fn newest_image(dir: &Path, database: &str, exclude: &Path) -> Result<Option<PathBuf>> {
        let prefix = database.to_ascii_uppercase();
        let image = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path != exclude)
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_ascii_uppercase().starts_with(&prefix))
                    .unwrap_or(false)
            })
            .sorted()
            .next_back();
        Ok(image)
    }
}

impl FileExtProvider for Db2Engine {
    fn file_ext(&self) -> &'static str {
        "db2"
    }
}

impl DatabaseEngine for Db2Engine {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Db2
    }

    fn connect(&mut self, target: &BackupTarget) -> Result<()> {
        require_target(target, self.kind())?;
        let statement = format!(
            "CONNECT TO {} USER {} USING {}",
            target.database(),
            target.user(),
            target.password().inner()
        );
        run_checked(
            self.runner.as_ref(),
            &Self::clp(statement),
            CLP_POLICY,
            Error::connection,
        )?;
        self.session = Some(target.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn artifact_stem(&self) -> String {
        self.session
            .as_ref()
            .map(|t| t.database().clone())
            .unwrap_or_default()
    }

    fn dump(&mut self, dst: &Path) -> Result<PathBuf> {
        let target = self.session.as_ref().ok_or(Error::NotConnected)?;
        let dir = dst
            .parent()
            .ok_or_else(|| Error::backup(format!("{:?} has no parent directory", dst)))?;
        let statement = format!(
            "BACKUP DATABASE {} USER {} USING {} TO {} COMPRESS",
            target.database(),
            target.user(),
            target.password().inner(),
            dir.display()
        );
        run_checked(
            self.runner.as_ref(),
            &Self::clp(statement),
            CLP_POLICY,
            Error::backup,
        )?;

        let image = Self::newest_image(dir, target.database(), dst)?.ok_or_else(|| {
            Error::backup(format!(
                "db2 reported success but no backup image for {} appeared in {:?}",
                target.database(),
                dir
            ))
        })?;
        std::fs::rename(&image, dst)?;
        Ok(dst.to_path_buf())
    }

    fn validate(&self, path: &Path) -> Result<bool> {
        require_dump_file(path)?;
        let spec = CommandSpec::builder()
            .program("db2ckbkp")
            .args(vec![path.display().to_string()])
            .build();
        run_checked(self.runner.as_ref(), &spec, ExitCodePolicy::ZeroOnly, Error::validation)?;
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        if self.session.take().is_some() {
            run_checked(
                self.runner.as_ref(),
                &Self::clp("CONNECT RESET".to_string()),
                CLP_POLICY,
                Error::connection,
            )?;
        }
        Ok(())
    }
}
