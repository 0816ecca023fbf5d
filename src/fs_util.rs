use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::CivicError;

/// Opens `path` for reading, transparently decompressing `.gz` files.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>, CivicError> {
    let file = fs::File::open(path)
        .map_err(|err| CivicError::Filesystem(format!("open {}: {err}", path.display())))?;
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn ensure_parent(path: &Path) -> Result<(), CivicError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| CivicError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

/// Writes `content` next to `path` and renames it into place.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), CivicError> {
    ensure_parent(path)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(|err| CivicError::Filesystem(err.to_string()))?;
    sync_file(&tmp_path)?;
    fs::rename(&tmp_path, path).map_err(|err| CivicError::Filesystem(err.to_string()))?;
    sync_parent(path)
}

/// Flushes file contents and metadata to disk.
pub fn sync_file(path: &Path) -> Result<(), CivicError> {
    fs::File::open(path)
        .and_then(|file| file.sync_all())
        .map_err(|err| CivicError::Filesystem(format!("sync {}: {err}", path.display())))
}

/// Makes a rename into `path`'s directory durable.
#[cfg(unix)]
pub fn sync_parent(path: &Path) -> Result<(), CivicError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    sync_file(parent)
}

// directory handles cannot be opened for syncing here
#[cfg(not(unix))]
pub fn sync_parent(_path: &Path) -> Result<(), CivicError> {
    Ok(())
}
