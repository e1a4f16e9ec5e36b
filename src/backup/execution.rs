//! Execution Mode Adapter.
//!
//! The pipeline is synchronous. Async callers get it on a blocking worker
//! through [`run_blocking`]; batch callers run many jobs side by side on a
//! rayon pool through [`run_jobs`].

use crate::backup::job_config::Job;
use crate::backup::manager::{BackupManager, DatabaseKind};
use crate::backup::pipeline::BackupReport;
use crate::backup::result_error::result::Result;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{error, info};

/// Runs `f` on tokio's blocking pool and waits for it without blocking the
/// calling task. A panic in `f` surfaces as a runtime error.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Result of one batch job.
#[derive(Debug)]
pub struct JobOutcome {
    pub name: String,
    pub result: Result<BackupReport>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs every job on `pool`, each through its own manager built by
/// `new_manager`, and reports the outcomes in job order.
///
/// One failing job does not stop the others.
pub fn run_jobs<M>(pool: &ThreadPool, jobs: &[Job], new_manager: M) -> Vec<JobOutcome>
where
    M: Fn(DatabaseKind) -> BackupManager + Sync,
{
    pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                info!("Job {:?}: starting {} backup", job.name(), job.database());
                let mut manager = new_manager(*job.database());
                let result = manager.perform_pipeline(job.target(), job.options());
                match &result {
                    Ok(report) => info!("Job {:?}: wrote {:?}", job.name(), report.artifact),
                    Err(e) => error!("Job {:?} failed: {e}", job.name()),
                }
                JobOutcome {
                    name: job.name().clone(),
                    result,
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::command::testing::FakeRunner;
    use crate::backup::manager::testing::{dir_entries, manager, server_target};
    use crate::backup::pipeline::{BackupTarget, PipelineOptions};
    use crate::backup::result_error::error::{Error, ErrorKind};
    use crate::backup::upload::testing::FakeUploader;
    use rayon::ThreadPoolBuilder;
    use std::path::Path;

    fn sqlite_db(dir: &Path, name: &str, rows: usize) -> String {
        let path = dir.join(name);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        for _ in 0..rows {
            conn.execute("INSERT INTO t DEFAULT VALUES", []).unwrap();
        }
        path.to_string_lossy().into_owned()
    }

    fn job(name: &str, database: DatabaseKind, target: BackupTarget, out: &Path) -> Job {
        Job::builder()
            .name(name)
            .database(database)
            .target(target)
            .options(PipelineOptions::builder().destination_dir(out).build())
            .build()
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let value = run_blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_error() {
        let err = run_blocking(|| -> Result<()> { Err(Error::backup("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backup);
    }

    #[tokio::test]
    async fn test_run_blocking_panic_is_runtime_error() {
        let err = run_blocking(|| -> Result<()> { panic!("worker died") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_run_jobs_isolates_failures() {
        let source_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            job(
                "first",
                DatabaseKind::Sqlite,
                BackupTarget::builder()
                    .database(sqlite_db(source_dir.path(), "first.db", 2))
                    .build(),
                out_dir.path(),
            ),
            job("legacy", DatabaseKind::Postgres, server_target(), out_dir.path()),
            job(
                "second",
                DatabaseKind::Sqlite,
                BackupTarget::builder()
                    .database(sqlite_db(source_dir.path(), "second.db", 3))
                    .build(),
                out_dir.path(),
            ),
        ];
        let pool = ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let runner = FakeRunner::default();
        let uploader = FakeUploader::default();

        let outcomes = run_jobs(&pool, &jobs, |kind| manager(kind, &runner, &uploader));

        let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["first", "legacy", "second"]);
        assert!(outcomes[0].is_success());
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
        assert!(outcomes[2].is_success());

        let entries = dir_entries(out_dir.path());
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("first.") && entries[0].ends_with(".db.xz"));
        assert!(entries[1].starts_with("second.") && entries[1].ends_with(".db.xz"));
    }
}
