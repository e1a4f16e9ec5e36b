//! Per-run scratch space for intermediate artifacts.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

static SCRATCH_PREFIX: &str = ".db_vault-";
static RESERVATION_SUFFIX: &str = ".reserved";
static TIME_FORMAT: &str = "%Y-%m-%dT%Hh%Mm%Ss";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Hidden marker in the destination holding an artifact name for one run.
#[derive(Debug)]
struct Reservation {
    marker: PathBuf,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.marker) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Cannot remove name reservation {:?}: {e}", self.marker);
            }
        }
    }
}

/// A unique directory owned by exactly one pipeline run.
///
/// Dropping it removes everything inside, so intermediate files never outlive
/// the run whichever way it ends. The final artifact leaves through [`persist`].
///
/// [`persist`]: ScratchDir::persist
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
    destination: PathBuf,
    reservation: Option<Reservation>,
}

impl ScratchDir {
    /// Creates the scratch directory inside `destination_dir` when given, so
    /// that persisting is a same-filesystem rename, else under the system
    /// temp dir.
    pub fn create(destination_dir: Option<&Path>) -> Result<Self> {
        let destination = match destination_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(Error::from)
                    .add_msg(format!("cannot create destination dir {:?}", dir))?;
                dir.to_path_buf()
            }
            None => std::env::temp_dir(),
        };
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&destination)
            .map_err(Error::from)
            .add_msg(format!("cannot create scratch dir in {:?}", destination))?;
        tracing::debug!("Created scratch dir {:?}", dir.path());
        Ok(Self {
            dir,
            destination,
            reservation: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where persisted artifacts end up.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Reserves an artifact name in the destination and returns the raw
    /// dump path for it: `<stem>.<UTC timestamp>[-<n>].<ext>`.
    ///
    /// A name is free when no other live run holds it and no file in the
    /// destination starts with it. Every later stage only appends suffixes,
    /// so the final artifact and its remote object name stay unique too.
    /// The reservation is released once the artifact is persisted or the
    /// run ends.
    pub fn reserve_artifact(&mut self, stem: &str, ext: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        for seq in 0..MAX_NAME_ATTEMPTS {
            let base = artifact_base_name(stem, now, seq);
            let marker = self
                .destination
                .join(format!(".{base}{RESERVATION_SUFFIX}"));
            match OpenOptions::new().write(true).create_new(true).open(&marker) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::from(e).add_msg(format!("cannot reserve {:?}", marker)))
                }
            }
            let reservation = Reservation { marker };
            // Checked after the marker exists: a run releases its marker only
            // after its artifact landed, so a finished run is always seen.
            if self.is_taken(&base)? {
                continue;
            }
            self.reservation = Some(reservation);
            return Ok(self.path().join(format!("{base}.{ext}")));
        }
        Err(Error::backup(format!(
            "no free artifact name for {stem:?} in {:?}",
            self.destination
        )))
    }

    fn is_taken(&self, base: &str) -> Result<bool> {
        let prefix = format!("{base}.");
        for entry in std::fs::read_dir(&self.destination)? {
            if entry?.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Moves `artifact` out of the scratch dir into the destination and
    /// removes the scratch dir.
    pub fn persist(mut self, artifact: &Path) -> Result<PathBuf> {
        let file_name = artifact
            .file_name()
            .ok_or_else(|| Error::invalid_argument(format!("{:?} has no file name", artifact)))?;
        let target = self.destination.join(file_name);
        if target.exists() {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{:?} already exists", target),
            )));
        }
        std::fs::rename(artifact, &target)
            .map_err(Error::from)
            .add_msg(format!("cannot move {:?} to {:?}", artifact, target))?;
        drop(self.reservation.take());
        self.close()?;
        Ok(target)
    }

    /// Removes the scratch dir now, reporting failure instead of ignoring it.
    pub fn close(self) -> Result<()> {
        let Self {
            dir, reservation, ..
        } = self;
        let path = dir.path().to_path_buf();
        let res = dir
            .close()
            .map_err(Error::from)
            .add_msg(format!("cannot remove scratch dir {:?}", path));
        drop(reservation);
        res
    }
}

/// `<sanitized stem>.<UTC timestamp>`, with `-<seq>` appended when `seq > 0`.
pub fn artifact_base_name(stem: &str, now: DateTime<Utc>, seq: u32) -> String {
    let stem = sanitize_filename::sanitize(stem);
    let stem = if stem.is_empty() { "backup".to_string() } else { stem };
    match seq {
        0 => format!("{}.{}", stem, now.format(TIME_FORMAT)),
        n => format!("{}.{}-{}", stem, now.format(TIME_FORMAT), n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_artifact_base_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(artifact_base_name("app", now, 0), "app.2024-03-09T07h05m01s");
        assert_eq!(artifact_base_name("app", now, 2), "app.2024-03-09T07h05m01s-2");
        assert_eq!(
            artifact_base_name("../etc/passwd", now, 0),
            "..etcpasswd.2024-03-09T07h05m01s"
        );
        assert_eq!(artifact_base_name("", now, 0), "backup.2024-03-09T07h05m01s");
    }

    #[test]
    fn test_scratch_dirs_are_unique_per_run() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = ScratchDir::create(Some(temp_dir.path())).unwrap();
        let b = ScratchDir::create(Some(temp_dir.path())).unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().parent().unwrap(), temp_dir.path());
        assert!(file_name(a.path()).starts_with(SCRATCH_PREFIX));
    }

    #[test]
    fn test_drop_removes_intermediate_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let mut scratch = ScratchDir::create(Some(temp_dir.path())).unwrap();
        let raw = scratch.reserve_artifact("app", "sql", now).unwrap();
        std::fs::write(&raw, b"partial").unwrap();
        let path = scratch.path().to_path_buf();

        drop(scratch);

        assert!(!path.exists());
        assert!(entries(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_concurrent_runs_reserve_distinct_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let mut a = ScratchDir::create(Some(temp_dir.path())).unwrap();
        let mut b = ScratchDir::create(Some(temp_dir.path())).unwrap();

        let raw_a = a.reserve_artifact("app", "db", now).unwrap();
        let raw_b = b.reserve_artifact("app", "db", now).unwrap();

        assert_eq!(file_name(&raw_a), "app.2024-03-09T07h05m01s.db");
        assert_eq!(file_name(&raw_b), "app.2024-03-09T07h05m01s-1.db");
        a.close().unwrap();
        b.close().unwrap();
        assert!(entries(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_reservation_skips_finished_artifacts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        std::fs::write(
            temp_dir.path().join("app.2024-03-09T07h05m01s.db.xz.enc"),
            b"earlier run",
        )
        .unwrap();
        let mut scratch = ScratchDir::create(Some(temp_dir.path())).unwrap();

        let raw = scratch.reserve_artifact("app", "db", now).unwrap();

        assert_eq!(file_name(&raw), "app.2024-03-09T07h05m01s-1.db");
    }

    #[test]
    fn test_persist_leaves_only_final_artifact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let out = temp_dir.path().join("out");
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let mut scratch = ScratchDir::create(Some(&out)).unwrap();
        let raw = scratch.reserve_artifact("app", "db", now).unwrap();
        let artifact = raw.with_extension("db.xz");
        std::fs::write(&artifact, b"compressed").unwrap();
        std::fs::write(scratch.path().join("leftover.tmp"), b"junk").unwrap();

        let persisted = scratch.persist(&artifact).unwrap();

        assert_eq!(persisted, out.join("app.2024-03-09T07h05m01s.db.xz"));
        assert_eq!(entries(&out), vec!["app.2024-03-09T07h05m01s.db.xz"]);
    }

    #[test]
    fn test_persist_refuses_to_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.db.xz"), b"older").unwrap();
        let scratch = ScratchDir::create(Some(temp_dir.path())).unwrap();
        let artifact = scratch.path().join("app.db.xz");
        std::fs::write(&artifact, b"newer").unwrap();

        let err = scratch.persist(&artifact).unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            std::fs::read(temp_dir.path().join("app.db.xz")).unwrap(),
            b"older"
        );
    }
}
