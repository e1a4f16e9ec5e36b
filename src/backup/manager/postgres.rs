use crate::backup::file_ext::FileExtProvider;
use crate::backup::manager::{DatabaseEngine, DatabaseKind};
use crate::backup::pipeline::BackupTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};

/// Placeholder for PostgreSQL. Every operation but `close` is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresEngine;

fn not_implemented() -> Error {
    Error::not_implemented("PostgreSQL backup")
}

impl FileExtProvider for PostgresEngine {
    fn file_ext(&self) -> &'static str {
        "sql"
    }
}

impl DatabaseEngine for PostgresEngine {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn connect(&mut self, _target: &BackupTarget) -> Result<()> {
        Err(not_implemented())
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn ensure_supported(&self) -> Result<()> {
        Err(not_implemented())
    }

    fn artifact_stem(&self) -> String {
        String::new()
    }

    fn dump(&mut self, _dst: &Path) -> Result<PathBuf> {
        Err(not_implemented())
    }

    fn validate(&self, _path: &Path) -> Result<bool> {
        Err(not_implemented())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::command::testing::FakeRunner;
    use crate::backup::manager::testing::{manager, server_target};
    use crate::backup::manager::ManagerState;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::upload::testing::FakeUploader;

    #[test]
    fn test_every_operation_is_refused() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("dump.sql");
        std::fs::write(&file, "SELECT 1;\n").unwrap();
        let runner = FakeRunner::default();
        let uploader = FakeUploader::default();
        let mut manager = manager(DatabaseKind::Postgres, &runner, &uploader);

        for err in [
            manager.connect(&server_target()).unwrap_err(),
            manager.validate(&file).unwrap_err(),
            manager.compress(&file).unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::NotImplemented);
            assert!(!err.is_retryable());
        }
        assert!(file.is_file());
        assert_eq!(manager.state(), ManagerState::Disconnected);
        manager.close().unwrap();
        assert!(runner.programs().is_empty());
    }
}
