use crate::backup::file_ext::FileExtProvider;
use crate::backup::manager::{require_dump_file, require_target, DatabaseEngine, DatabaseKind};
use crate::backup::pipeline::BackupTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use rusqlite::{Connection, OpenFlags, MAIN_DB};
use std::path::{Path, PathBuf};

static INTEGRITY_OK: &str = "ok";

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// SQLite files, backed up in-process through the online backup API.
///
/// `database` is the file path; host, user and password are ignored.
#[derive(Default)]
pub struct SqliteEngine {
    session: Option<(PathBuf, Connection)>,
}

impl FileExtProvider for SqliteEngine {
    fn file_ext(&self) -> &'static str {
        "db"
    }
}

impl DatabaseEngine for SqliteEngine {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn connect(&mut self, target: &BackupTarget) -> Result<()> {
        require_target(target, self.kind())?;
        let path = PathBuf::from(target.database());
        if !path.is_file() {
            return Err(Error::connection(format!(
                "sqlite database file {:?} does not exist",
                path
            )));
        }

        let conn = open_read_only(&path)
            .and_then(|conn| {
                conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| {
                    r.get::<_, i64>(0)
                })?;
                Ok(conn)
            })
            .map_err(|e| Error::connection(format!("cannot open {:?}: {e}", path)))?;
        self.session = Some((path, conn));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn artifact_stem(&self) -> String {
        self.session
            .as_ref()
            .and_then(|(path, _)| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn dump(&mut self, dst: &Path) -> Result<PathBuf> {
        let (_, conn) = self.session.as_ref().ok_or(Error::NotConnected)?;
        conn.backup(MAIN_DB, dst, None)?;
        Ok(dst.to_path_buf())
    }

    /// `PRAGMA integrity_check` on the copy.
    fn validate(&self, path: &Path) -> Result<bool> {
        require_dump_file(path)?;
        let verdict = open_read_only(path)
            .and_then(|conn| {
                conn.query_row("PRAGMA integrity_check", [], |r| r.get::<_, String>(0))
            })
            .map_err(|e| Error::validation(format!("{:?} is not a usable sqlite file: {e}", path)))?;
        if verdict != INTEGRITY_OK {
            tracing::warn!("Integrity check of {:?} reported: {}", path, verdict);
        }
        Ok(verdict == INTEGRITY_OK)
    }

    fn close(&mut self) -> Result<()> {
        if let Some((_, conn)) = self.session.take() {
            conn.close().map_err(|(_, e)| Error::from(e))?;
        }
        Ok(())
    }
}
