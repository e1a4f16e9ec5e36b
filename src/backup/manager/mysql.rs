use crate::backup::command::{run_checked, CommandRunner, CommandSpec, ExitCodePolicy};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::manager::{
    require_dump_file, require_target, with_validation_namespace, DatabaseEngine, DatabaseKind,
};
use crate::backup::pipeline::BackupTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static PASSWORD_ENV: &str = "MYSQL_PWD";

/// MySQL/MariaDB through the `mysql` client and `mysqldump`.
///
/// The password reaches the tools through `MYSQL_PWD`, never the command line.
pub struct MysqlEngine {
    runner: Arc<dyn CommandRunner>,
    session: Option<BackupTarget>,
}

impl MysqlEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            session: None,
        }
    }

    fn session(&self) -> Result<&BackupTarget> {
        self.session.as_ref().ok_or(Error::NotConnected)
    }

    fn client(target: &BackupTarget, program: &str, args: &[&str]) -> CommandSpec {
        let mut full_args = vec![
            "-h".to_string(),
            target.host().clone(),
            "-u".to_string(),
            target.user().clone(),
        ];
        full_args.extend(args.iter().map(|a| a.to_string()));
        CommandSpec::builder()
            .program(program)
            .args(full_args)
            .env(vec![(PASSWORD_ENV.to_string(), target.password().clone())])
            .build()
    }

    fn execute(&self, target: &BackupTarget, sql: &str) -> Result<()> {
        let spec = Self::client(target, "mysql", &["-e", sql]);
        run_checked(self.runner.as_ref(), &spec, ExitCodePolicy::ZeroOnly, Error::validation)
            .map(|_| ())
    }
}

impl FileExtProvider for MysqlEngine {
    fn file_ext(&self) -> &'static str {
        "sql"
    }
}

impl DatabaseEngine for MysqlEngine {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }

    fn connect(&mut self, target: &BackupTarget) -> Result<()> {
        require_target(target, self.kind())?;
        let spec = Self::client(target, "mysql", &["-e", "SELECT 1", target.database()]);
        run_checked(
            self.runner.as_ref(),
            &spec,
            ExitCodePolicy::ZeroOnly,
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
        let target = self.session()?;
        let spec = CommandSpec::builder()
            .program("mysqldump")
            .args(vec![
                "-h".to_string(),
                target.host().clone(),
                "-u".to_string(),
                target.user().clone(),
                "--single-transaction".to_string(),
                "--routines".to_string(),
                "--triggers".to_string(),
                target.database().clone(),
            ])
            .env(vec![(PASSWORD_ENV.to_string(), target.password().clone())])
            .stdout_to(dst.to_path_buf())
            .build();
        run_checked(self.runner.as_ref(), &spec, ExitCodePolicy::ZeroOnly, Error::backup)?;
        Ok(dst.to_path_buf())
    }

    /// Restores the dump into a throwaway database, which is always dropped.
    fn validate(&self, path: &Path) -> Result<bool> {
        require_dump_file(path)?;
        let target = self.session()?;

        with_validation_namespace(
            |name| self.execute(target, &format!("DROP DATABASE IF EXISTS `{name}`")),
            |name| {
                self.execute(target, &format!("CREATE DATABASE `{name}`"))?;
                let import = CommandSpec::builder()
                    .program("mysql")
                    .args(vec![
                        "-h".to_string(),
                        target.host().clone(),
                        "-u".to_string(),
                        target.user().clone(),
                        name.to_string(),
                    ])
                    .env(vec![(PASSWORD_ENV.to_string(), target.password().clone())])
                    .stdin_from(path.to_path_buf())
                    .build();
                run_checked(
                    self.runner.as_ref(),
                    &import,
                    ExitCodePolicy::ZeroOnly,
                    Error::validation,
                )
                .map(|_| ())
            },
        )
    }

    fn close(&mut self) -> Result<()> {
        self.session = None;
        Ok(())
    }
}
