use crate::backup::command::{run_checked, CommandRunner, CommandSpec, ExitCodePolicy};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::manager::{require_dump_file, require_target, DatabaseEngine, DatabaseKind};
use crate::backup::pipeline::BackupTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static PASSWORD_ENV: &str = "REDISCLI_AUTH";

/// Redis through `redis-cli --rdb` and `redis-check-rdb`.
///
/// `database` is the logical database index. The password goes through
/// `REDISCLI_AUTH`.
pub struct RedisEngine {
    runner: Arc<dyn CommandRunner>,
    session: Option<BackupTarget>,
}

impl RedisEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            session: None,
        }
    }

    fn cli(target: &BackupTarget, extra: Vec<String>) -> CommandSpec {
        let (host, port) = match target.host().rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => (host, Some(port)),
            _ => (target.host().as_str(), None),
        };
        let mut args = vec!["-h".to_string(), host.to_string()];
        if let Some(port) = port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        args.extend([
            "--user".to_string(),
            target.user().clone(),
            "--no-auth-warning".to_string(),
            "-n".to_string(),
            target.database().clone(),
        ]);
        args.extend(extra);
        CommandSpec::builder()
            .program("redis-cli")
            .args(args)
            .env(vec![(PASSWORD_ENV.to_string(), target.password().clone())])
            .build()
    }
}

impl FileExtProvider for RedisEngine {
    fn file_ext(&self) -> &'static str {
        "rdb"
    }
}

impl DatabaseEngine for RedisEngine {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Redis
    }

    fn connect(&mut self, target: &BackupTarget) -> Result<()> {
        require_target(target, self.kind())?;
        let output = run_checked(
            self.runner.as_ref(),
            &Self::cli(target, vec!["PING".to_string()]),
            ExitCodePolicy::ZeroOnly,
            Error::connection,
        )?;
        // redis-cli exits 0 on auth errors and prints them instead
        if output.stdout.trim() != "PONG" {
            return Err(Error::connection(format!(
                "redis did not answer PING: {}",
                output.diagnostics()
            )));
        }
        self.session = Some(target.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn artifact_stem(&self) -> String {
        self.session
            .as_ref()
            .map(|t| format!("redis-db{}", t.database()))
            .unwrap_or_default()
    }

    fn dump(&mut self, dst: &Path) -> Result<PathBuf> {
        let target = self.session.as_ref().ok_or(Error::NotConnected)?;
        let spec = Self::cli(target, vec!["--rdb".to_string(), dst.display().to_string()]);
        run_checked(self.runner.as_ref(), &spec, ExitCodePolicy::ZeroOnly, Error::backup)?;
        Ok(dst.to_path_buf())
    }

    fn validate(&self, path: &Path) -> Result<bool> {
        require_dump_file(path)?;
        let spec = CommandSpec::builder()
            .program("redis-check-rdb")
            .args(vec![path.display().to_string()])
            .build();
        run_checked(self.runner.as_ref(), &spec, ExitCodePolicy::ZeroOnly, Error::validation)?;
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        self.session = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::command::testing::FakeRunner;
    use crate::backup::result_error::error::ErrorKind;

    fn target() -> BackupTarget {
        BackupTarget::builder()
            .host("cache.internal:6380")
            .user("default")
            .password("hunter22")
            .database("0")
            .build()
    }

    fn pong() -> FakeRunner {
        FakeRunner::default().on("redis-cli", Some("PING"), |_| FakeRunner::ok("PONG\n"))
    }

    #[test]
    fn test_connect_splits_port_and_hides_password() {
        let runner = pong();
        let mut engine = RedisEngine::new(Arc::new(runner.clone()));

        engine.connect(&target()).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec!["redis-cli -h cache.internal -p 6380 --user default --no-auth-warning -n 0 PING"]
        );
        assert_eq!(engine.artifact_stem(), "redis-db0");
    }

    #[test]
    fn test_auth_error_on_stdout_is_connection_error() {
        let runner = FakeRunner::default().on("redis-cli", None, |_| {
            FakeRunner::ok("AUTH failed: WRONGPASS invalid username-password pair\n")
        });
        let mut engine = RedisEngine::new(Arc::new(runner));

        let err = engine.connect(&target()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("WRONGPASS"));
        assert!(!engine.is_connected());
    }

    #[test]
    fn test_dump_then_validate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = pong().on("redis-cli", Some("--rdb"), |spec| {
            let dst = spec.args().last().unwrap();
            std::fs::write(dst, b"REDIS0011")?;
            FakeRunner::ok("")
        });
        let mut engine = RedisEngine::new(Arc::new(runner.clone()));
        engine.connect(&target()).unwrap();
        let dst = temp_dir.path().join("dump.rdb");

        engine.dump(&dst).unwrap();
        assert!(engine.validate(&dst).unwrap());

        assert_eq!(runner.programs(), vec!["redis-cli", "redis-cli", "redis-check-rdb"]);
    }

    #[test]
    fn test_corrupt_rdb_fails_validation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let rdb = temp_dir.path().join("dump.rdb");
        std::fs::write(&rdb, b"not an rdb").unwrap();
        let runner = FakeRunner::default().on("redis-check-rdb", None, |_| {
            FakeRunner::exit(1, "--- RDB ERROR DETECTED ---\nWrong signature trying to load DB from file")
        });
        let engine = RedisEngine::new(Arc::new(runner));

        let err = engine.validate(&rdb).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("Wrong signature"));
    }
}
