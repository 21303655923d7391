//! Atomic persistence of the assembled document.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output directory `{}` does not exist", .0.display())]
    MissingParent(PathBuf),
    #[error("output path `{}` is a directory", .0.display())]
    IsDirectory(PathBuf),
    #[error("failed to write `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OutputError {
    fn write(path: &Path, source: io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `bytes` to `path` through a temp file in the same directory, then rename.
///
/// The destination is either absent or complete: a failed write leaves no file behind.
pub fn persist_atomic(path: &Path, bytes: &[u8]) -> Result<u64, OutputError> {
    let started_at = Instant::now();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    if !parent.is_dir() {
        warn!(
            target = "reportpress::infra::output",
            op = "persist_atomic",
            result = "missing_parent",
            path = %path.display(),
            "Output directory does not exist"
        );
        return Err(OutputError::MissingParent(parent.to_path_buf()));
    }
    if path.is_dir() {
        return Err(OutputError::IsDirectory(path.to_path_buf()));
    }

    let mut staged = tempfile::Builder::new()
        .prefix(".reportpress-")
        .suffix(".pdf.part")
        .tempfile_in(parent)
        .map_err(|err| OutputError::write(path, err))?;
    staged
        .write_all(bytes)
        .map_err(|err| OutputError::write(path, err))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|err| OutputError::write(path, err))?;
    staged
        .persist(path)
        .map_err(|err| OutputError::write(path, err.error))?;

    info!(
        target = "reportpress::infra::output",
        op = "persist_atomic",
        result = "ok",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        path = %path.display(),
        bytes = bytes.len(),
        "Document written"
    );
    Ok(bytes.len() as u64)
}

/// Run [`persist_atomic`] on the blocking pool.
pub async fn persist(path: PathBuf, bytes: Vec<u8>) -> Result<u64, OutputError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || persist_atomic(&path, &bytes))
        .await
        .map_err(|err| OutputError::write(&target, io::Error::other(err)))?
}
