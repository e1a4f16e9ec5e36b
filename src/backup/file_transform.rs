//! File-to-file streaming transforms shared by the compress and encrypt stages.
//!
//! The destination is created with `create_new`, so an existing artifact is
//! never clobbered, and it is removed again on every failure path.

use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError, Read, Write};
use std::path::{Path, PathBuf};

/// Streams `src` into `dst` through the writer built by `wrap`.
pub fn write_through<W, F>(src: &Path, dst: &Path, wrap: F) -> Result<()>
where
    W: Write + Finish<BufWriter<File>>,
    F: FnOnce(BufWriter<File>) -> Result<W>,
{
    let mut reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create_new(dst)?);
    let res = wrap(writer).and_then(|mut w| {
        std::io::copy(&mut reader, &mut w)?;
        w.finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    });
    remove_on_error(res, dst)
}

/// Streams `src` into `dst` through the reader built by `unwrap`.
pub fn read_through<R, F>(src: &Path, dst: &Path, unwrap: F) -> Result<()>
where
    R: Read,
    F: FnOnce(BufReader<File>) -> Result<R>,
{
    let reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create_new(dst)?);
    let res = unwrap(reader).and_then(|mut r| {
        std::io::copy(&mut r, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    });
    remove_on_error(res, dst)
}

/// `path` with `.ext` appended to the full file name.
pub fn with_appended_ext(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// `path` with a trailing `.ext` removed, or `None` if it does not end that way.
pub fn with_stripped_ext(path: &Path, ext: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{ext}"))?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

fn remove_on_error(res: Result<()>, dst: &Path) -> Result<()> {
    res.map_err(|e| match std::fs::remove_file(dst) {
        Ok(_) => e,
        Err(rm) if rm.kind() == std::io::ErrorKind::NotFound => e,
        Err(rm) => e.chain(Error::from(rm)),
    })
}
