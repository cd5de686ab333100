//! Building file descriptors from local paths.
//!
//! Directories are walked recursively; entries are visited in name order so
//! the resulting queue order is stable across runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use upqueue_protocol::FileInfo;
use upqueue_protocol::constants::DEFAULT_MIME_TYPE;

use crate::TransferError;

/// Describes a single regular file.
pub fn describe_file(path: &Path) -> Result<FileInfo, TransferError> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidPath(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;

    let mime = detect_content_type(path).unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let mut info = FileInfo::new(name, metadata.len() as i64, path).with_mime_type(mime);
    if let Ok(modified) = metadata.modified() {
        info = info.with_modified(DateTime::<Utc>::from(modified));
    }
    Ok(info)
}

/// Describes every file named by `paths`, expanding directories.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<FileInfo>, TransferError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut files)?;
        } else {
            files.push(describe_file(path)?);
        }
    }
    Ok(files)
}

fn walk_dir(current: &Path, files: &mut Vec<FileInfo>) -> Result<(), TransferError> {
    let mut entries = std::fs::read_dir(current)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let metadata = std::fs::metadata(&path)?;
        if metadata.is_dir() {
            walk_dir(&path, files)?;
        } else if metadata.is_file() {
            files.push(describe_file(&path)?);
        }
    }
    Ok(())
}

/// Guesses a MIME type from the file extension.
pub fn detect_content_type(path: impl AsRef<Path>) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}
