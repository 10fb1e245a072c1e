//! Filesystem helpers with tagged failure kinds.
//!
//! Callers need to tell "missing" from "locked by another process" from
//! "hard links not possible here" without inspecting error strings, so every
//! helper returns an [`FsError`] carrying an [`FsErrorKind`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for filesystem helpers.
pub type FsResult<T> = Result<T, FsError>;

/// Classification of a filesystem failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    /// The path does not exist.
    NotFound,
    /// The path already exists.
    AlreadyExists,
    /// Another process holds the file open in a way that blocks the operation.
    Locked,
    /// Source and destination live on different volumes.
    CrossDevice,
    /// The OS refused access.
    PermissionDenied,
    /// Anything else.
    Other,
}

/// A filesystem operation failure.
#[derive(Debug, Error)]
#[error("{operation} failed for {}: {source}", path.display())]
pub struct FsError {
    pub kind: FsErrorKind,
    pub operation: &'static str,
    pub path: PathBuf,
    /// Processes holding the path open, where the platform lets us find out.
    pub processes: Vec<String>,
    #[source]
    pub source: io::Error,
}

impl FsError {
    pub fn new(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let kind = classify(&source);
        let path = path.into();
        let processes = if kind == FsErrorKind::Locked {
            holders(&path)
        } else {
            Vec::new()
        };
        Self {
            kind,
            operation,
            path,
            processes,
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FsErrorKind::NotFound
    }
}

#[cfg(windows)]
const CROSS_DEVICE_CODES: &[i32] = &[17];
#[cfg(not(windows))]
const CROSS_DEVICE_CODES: &[i32] = &[18];

// ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
const LOCKED_CODES: &[i32] = &[32, 33];
// ETXTBSY
#[cfg(not(windows))]
const LOCKED_CODES: &[i32] = &[26];

/// Classify an I/O error.
pub fn classify(err: &io::Error) -> FsErrorKind {
    if let Some(code) = err.raw_os_error() {
        if CROSS_DEVICE_CODES.contains(&code) {
            return FsErrorKind::CrossDevice;
        }
        if LOCKED_CODES.contains(&code) {
            return FsErrorKind::Locked;
        }
    }

    match err.kind() {
        io::ErrorKind::NotFound => FsErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => FsErrorKind::AlreadyExists,
        io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
        _ => FsErrorKind::Other,
    }
}

/// Names of processes with `path`, or anything beneath it, open.
///
/// Walks `/proc/<pid>/fd`. Processes we may not inspect are skipped, so the
/// list can be incomplete but never wrong.
#[cfg(target_os = "linux")]
pub fn holders(path: &Path) -> Vec<String> {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let Ok(procs) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut names = Vec::new();
    for entry in procs.flatten() {
        let pid = entry.file_name();
        if !pid.to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds = fds
            .flatten()
            .filter_map(|fd| fs::read_link(fd.path()).ok())
            .any(|open| open.starts_with(&target));
        if !holds {
            continue;
        }
        let name = fs::read_to_string(entry.path().join("comm"))
            .map(|comm| comm.trim_end().to_string())
            .unwrap_or_else(|_| pid.to_string_lossy().into_owned());
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Names of processes with `path` open. Not available on this platform.
#[cfg(not(target_os = "linux"))]
pub fn holders(_path: &Path) -> Vec<String> {
    Vec::new()
}

/// Create a directory and its parents.
pub fn create_dir_all(path: &Path) -> FsResult<()> {
    fs::create_dir_all(path).map_err(|e| FsError::new("create directory", path, e))
}

/// Create a hard link at `link` pointing to `original`.
///
/// A cross-device failure is reported as such and never degraded to a copy.
pub fn hard_link(original: &Path, link: &Path) -> FsResult<()> {
    fs::hard_link(original, link).map_err(|e| FsError::new("hard link", link, e))
}

/// Rename a file or directory.
pub fn rename(from: &Path, to: &Path) -> FsResult<()> {
    fs::rename(from, to).map_err(|e| FsError::new("rename", from, e))
}

/// Remove a file.
pub fn remove_file(path: &Path) -> FsResult<()> {
    fs::remove_file(path).map_err(|e| FsError::new("remove file", path, e))
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> FsResult<bool> {
    match remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree.
pub fn remove_dir_all(path: &Path) -> FsResult<()> {
    fs::remove_dir_all(path).map_err(|e| FsError::new("remove directory", path, e))
}

/// Whether two paths refer to the same physical file.
#[cfg(unix)]
pub fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

/// Whether two paths refer to the same physical file.
///
/// Without inode numbers the best available signal is matching length and
/// modification time, which hard links always share.
#[cfg(not(unix))]
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.len() == mb.len() && ma.modified().ok() == mb.modified().ok(),
        _ => false,
    }
}

/// Write `contents` to `path` by writing a sibling temp file and renaming it
/// over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> FsResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(FsError::new("write", &tmp, e));
    }

    rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// List every regular file below `root`, recursively.
pub fn walk_files(root: &Path) -> FsResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| FsError::new("read directory", &dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FsError::new("read directory", &dir, e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| FsError::new("stat", &path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
