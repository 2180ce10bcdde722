/*
File: ivr-aio/src/fs.rs
Purpose: Primitive synchronous filesystem operations.
*/
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ivr_common::error::{IvrError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        IvrError::from(e)
    })
}

/// Removes a file. A missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    debug!("Removing file: {}", path.display());
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove file {}: {}", path.display(), e);
            Err(IvrError::from(e))
        }
    }
}

/// Removes a directory and all its contents recursively. A missing directory
/// is not an error.
pub fn remove_directory_recursive(path: &Path) -> Result<()> {
    debug!("Removing directory recursively: {}", path.display());
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove dir_all {}: {}", path.display(), e);
            Err(IvrError::from(e))
        }
    }
}

/// Reads the entire contents of a file into a byte vector.
pub fn read_to_bytes(path: &Path) -> Result<Vec<u8>> {
    debug!("Reading file to bytes: {}", path.display());
    fs::read(path).map_err(|e| {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Failed read file {}: {}", path.display(), e);
        }
        IvrError::from(e)
    })
}

/// Atomically writes data to a file using a temporary file in the same
/// directory.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let temp_file = stage_file(original_path, content)?;
    persist_staged(temp_file, original_path)
}

/// Writes `content` to a temporary file next to `destination` without touching
/// the destination itself. Dropping the returned handle deletes the file.
pub fn stage_file(destination: &Path, content: &[u8]) -> Result<NamedTempFile> {
    let dir = destination.parent().ok_or_else(|| {
        IvrError::Generic(format!(
            "Cannot get parent directory for {}",
            destination.display()
        ))
    })?;
    create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    debug!(
        "Staging {} bytes for {} via temp file {}",
        content.len(),
        destination.display(),
        temp_file.path().display()
    );
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    Ok(temp_file)
}

/// Renames a staged temporary file over `destination`.
pub fn persist_staged(temp_file: NamedTempFile, destination: &Path) -> Result<()> {
    let temp_path = temp_file.path().to_path_buf();
    temp_file.persist(destination).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            destination.display(),
            e.error
        );
        IvrError::Io(Arc::new(e.error))
    })?;
    Ok(())
}

/// True when both paths exist and hold identical bytes.
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let (Ok(meta_a), Ok(meta_b)) = (fs::metadata(a), fs::metadata(b)) else {
        return Ok(false);
    };
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    let mut fa = io::BufReader::new(File::open(a)?);
    let mut fb = io::BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Total size in bytes of all regular files below `path`.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", path.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Lists directory entries as `(name, path, is_dir)`, sorted by name.
/// Skips entries that cause errors during reading.
pub fn list_directory_entries(dir_path: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    debug!("Listing directory entries for: {}", dir_path.display());
    let read_dir = fs::read_dir(dir_path).map_err(|e| {
        if e.kind() != io::ErrorKind::NotFound {
            error!("Failed to read directory {}: {}", dir_path.display(), e);
        }
        IvrError::from(e)
    })?;
    let mut entries = Vec::new();
    for entry_res in read_dir {
        match entry_res {
            Ok(entry) => {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                match entry.file_type() {
                    Ok(file_type) => entries.push((name, path, file_type.is_dir())),
                    Err(e) => warn!(
                        "Failed to get file type for {} in {}: {}",
                        path.display(),
                        dir_path.display(),
                        e
                    ),
                }
            }
            Err(e) => warn!("Error reading entry in {}: {}", dir_path.display(), e),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Every regular file below `root`, sorted.
pub fn list_files_recursive(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
