use crate::backup::result_error::{AddFunctionName, AddMsg};
use derive_more::Display;
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;
use thiserror_ext::Construct;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[display("dump")]
    Dump,
    #[display("validate")]
    Validate,
    #[display("compress")]
    Compress,
    #[display("encrypt")]
    Encrypt,
    #[display("upload")]
    Upload,
}

/// Root kind of an [`Error`], with every context wrapper stripped.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Connection,
    NotConnected,
    Backup,
    Validation,
    NotFound,
    Compression,
    Encryption,
    Decryption,
    KeyGeneration,
    Upload,
    NotImplemented,
    Io,
    Sqlite,
    Config,
    Runtime,
    Multiple,
}

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Database not connected")]
    NotConnected,
    #[error("Backup failed: {0}")]
    Backup(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("File not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Compression failed: {0}")]
    Compression(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("{0} is not implemented")]
    NotImplemented(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ThreadPoolBuild(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("{} stage failed:\n{}", stage, indent::indent_all_with("  ", error.to_string()))]
    StageFailed { stage: Stage, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidArgument(errors.to_string())
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    /// Tags the error with the pipeline stage that raised it.
    ///
    /// An error that already carries a stage keeps its original tag.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ Error::StageFailed { .. } => e,
            e => Error::StageFailed {
                stage,
                error: Box::new(e),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Connection(_) => ErrorKind::Connection,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::Backup(_) => ErrorKind::Backup,
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Compression(_) => ErrorKind::Compression,
            Error::Encryption(_) => ErrorKind::Encryption,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::KeyGeneration(_) => ErrorKind::KeyGeneration,
            Error::Upload(_) => ErrorKind::Upload,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Io(_) => ErrorKind::Io,
            Error::Rusqlite(_) => ErrorKind::Sqlite,
            Error::LiblzmaStream(_) => ErrorKind::Compression,
            Error::SerdeYml(_) => ErrorKind::Config,
            Error::ThreadPoolBuild(_) | Error::Join(_) => ErrorKind::Runtime,
            Error::StageFailed { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => match errors.first() {
                Some(first) => first.kind(),
                None => ErrorKind::Multiple,
            },
        }
    }

    /// Re-labels infrastructure errors (I/O, SQLite, runtime, config) as `kind`.
    ///
    /// Errors that already belong to the taxonomy keep their kind.
    pub fn relabel(self, kind: ErrorKind) -> Self {
        if !matches!(
            self.kind(),
            ErrorKind::Io | ErrorKind::Sqlite | ErrorKind::Runtime | ErrorKind::Config
        ) {
            return self;
        }
        let msg = self.to_string();
        match kind {
            ErrorKind::Connection => Error::Connection(msg),
            ErrorKind::Backup => Error::Backup(msg),
            ErrorKind::Validation => Error::Validation(msg),
            ErrorKind::Compression => Error::Compression(msg),
            ErrorKind::Encryption => Error::Encryption(msg),
            ErrorKind::Decryption => Error::Decryption(msg),
            ErrorKind::KeyGeneration => Error::KeyGeneration(msg),
            ErrorKind::Upload => Error::Upload(msg),
            _ => self,
        }
    }

    /// Outermost stage tag, if the error was raised inside the stage chain.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Error::StageFailed { stage, .. } => Some(*stage),
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => {
                error.failed_stage()
            }
            Error::LotsOfError(errors) => errors.first().and_then(Error::failed_stage),
            _ => None,
        }
    }

    /// Caller input problems and unimplemented variants never heal on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::NotImplemented
        )
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Appends `other` to this error, keeping this error first.
    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        let error = Error::backup("mysqldump exited with 2").add_msg("Custom message");

        match error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_add_fn_name() {
        let error = Error::upload("timeout").add_fn_name("dispatch");

        match &error {
            Error::WithFnName { fn_name, .. } => assert_eq!(fn_name, "dispatch"),
            _ => panic!("Expected WithFnName error"),
        }
        assert_eq!(error.kind(), ErrorKind::Upload);
    }

    #[test]
    fn test_kind_looks_through_wrappers() {
        let error = Error::validation("integrity check failed")
            .add_msg("validating backup.db")
            .in_stage(Stage::Validate)
            .add_fn_name("backup");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.failed_stage(), Some(Stage::Validate));
    }

    #[test]
    fn test_in_stage_keeps_first_stage() {
        let error = Error::compression("disk full")
            .in_stage(Stage::Compress)
            .in_stage(Stage::Upload);

        assert_eq!(error.failed_stage(), Some(Stage::Compress));
    }

    #[test]
    fn test_relabel_only_touches_infrastructure_errors() {
        let io = Error::from(std::io::Error::other("disk full"));
        assert_eq!(io.relabel(ErrorKind::Compression).kind(), ErrorKind::Compression);

        let not_found = Error::not_found("/tmp/ghost");
        assert_eq!(not_found.relabel(ErrorKind::Compression).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retryable() {
        assert!(!Error::invalid_argument("no destination").is_retryable());
        assert!(!Error::not_implemented("postgres backup").is_retryable());
        assert!(Error::connection("refused").is_retryable());
        assert!(Error::backup("dump failed").in_stage(Stage::Dump).is_retryable());
        assert!(!Error::invalid_argument("x")
            .add_msg("wrapped")
            .is_retryable());
    }

    #[test]
    fn test_validation_errors_become_invalid_argument() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("destination_dir", validator::ValidationError::new("Missing"));
        let error = Error::from(errors);
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_error_from_vec() {
        let errors = vec![
            Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "error1")),
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "error2",
            )),
        ];

        let combined_error = Error::from(errors);
        match combined_error {
            Error::LotsOfError(error_vec) => assert_eq!(error_vec.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    #[should_panic(expected = "Should not create lots of errors when error is empty")]
    fn test_error_from_empty_vec_panics() {
        let errors: Vec<Error> = vec![];
        let _error = Error::from(errors);
    }

    #[test]
    fn test_error_chain_keeps_primary_kind() {
        let primary = Error::backup("dump failed").in_stage(Stage::Dump);
        let cleanup = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "cannot remove scratch dir",
        ));

        let chained = primary.chain(cleanup);
        assert_eq!(chained.kind(), ErrorKind::Backup);
        assert_eq!(chained.failed_stage(), Some(Stage::Dump));
        match chained {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    fn test_stage_display_indents_cause() {
        let error = Error::backup("mysqldump: Got error: 1045").in_stage(Stage::Dump);
        let error_str = error.to_string();

        assert!(error_str.starts_with("dump stage failed:"));
        assert!(error_str.contains("  Backup failed: mysqldump: Got error: 1045"));
    }
}
