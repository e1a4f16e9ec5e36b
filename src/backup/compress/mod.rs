pub mod xz;

use crate::backup::compress::xz::XzConfig;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::file_transform::{read_through, with_appended_ext, with_stripped_ext, write_through};
use crate::backup::function_path;
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use function_name::named;
use liblzma::read::XzDecoder;
use std::path::{Path, PathBuf};

/// Compresses `path` into `<path>.xz` and deletes the source on success.
#[named]
pub fn compress_file(path: &Path, config: &XzConfig) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::not_found(path));
    }

    let compressed = with_appended_ext(path, config.file_ext());
    tracing::info!("Compressing {:?} -> {:?}", path, compressed);
    write_through(path, &compressed, |w| config.build_encoder(w))
        .map_err(|e| e.relabel(ErrorKind::Compression))
        .add_fn_name(function_path!())?;

    std::fs::remove_file(path)
        .map_err(|e| Error::compression(format!("cannot remove source {:?}: {}", path, e)))?;
    Ok(compressed)
}

/// Inverse of [`compress_file`]: strips `.xz` and deletes the compressed input.
#[named]
pub fn decompress_file(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::not_found(path));
    }
    let plain = with_stripped_ext(path, XzConfig::default().file_ext()).ok_or_else(|| {
        Error::invalid_argument(format!("{:?} does not end with .xz", path))
    })?;

    read_through(path, &plain, |r| Ok(XzDecoder::new(r)))
        .map_err(|e| e.relabel(ErrorKind::Compression))
        .add_fn_name(function_path!())?;

    std::fs::remove_file(path)?;
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_file_replaces_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("dump.sql");
        std::fs::write(&src, "INSERT INTO t VALUES (1);\n".repeat(100)).unwrap();

        let compressed = compress_file(&src, &XzConfig::default()).unwrap();

        assert_eq!(compressed, temp_dir.path().join("dump.sql.xz"));
        assert!(compressed.is_file());
        assert!(!src.exists());
    }

    #[test]
    fn test_compress_decompress_restores_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("dump.sql");
        let content = b"CREATE TABLE t (id INT);\n".repeat(50);
        std::fs::write(&src, &content).unwrap();

        let compressed = compress_file(&src, &XzConfig::default()).unwrap();
        let plain = decompress_file(&compressed).unwrap();

        assert_eq!(plain, src);
        assert_eq!(std::fs::read(&plain).unwrap(), content);
        assert!(!compressed.exists());
    }

    #[test]
    fn test_compress_missing_source_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = compress_file(&temp_dir.path().join("ghost.sql"), &XzConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_compress_existing_target_is_compression_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("dump.sql");
        std::fs::write(&src, b"data").unwrap();
        std::fs::write(temp_dir.path().join("dump.sql.xz"), b"occupied").unwrap();

        let err = compress_file(&src, &XzConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
        assert!(src.exists());
    }

    #[test]
    fn test_decompress_garbage_is_compression_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("dump.sql.xz");
        std::fs::write(&src, b"definitely not xz").unwrap();

        let err = decompress_file(&src).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
        assert!(!temp_dir.path().join("dump.sql").exists());
        assert!(src.exists());
    }
}
