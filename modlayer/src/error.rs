//! Engine-level error taxonomy.
//!
//! Subsystem errors convert into [`EngineError`] so a failed run exposes
//! one error that says what kind of failure it was: metadata, transfer,
//! integrity, directory conflict, locked file, and so on.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::content::{ContentError, FsError, FsErrorKind};
use crate::fetch::TransferError;
use crate::host::HostError;
use crate::import::ImportError;
use crate::manifest::ManifestError;
use crate::resolver::{DirectoryCandidate, ResolveError};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The catalog could not be asked, or answered with errors.
    #[error("failed to resolve version metadata: {0}")]
    MetadataResolution(#[source] CatalogError),

    /// The package, variant or version no longer exists upstream.
    #[error("{0}")]
    MissingEntity(#[source] CatalogError),

    /// A blob could not be fetched within its retry budget.
    #[error(transparent)]
    Transfer(TransferError),

    /// A blob kept failing verification against its content hash.
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// More than one directory claims the same package variant.
    #[error("multiple mod directories for package {package_id} variant {variant_id}")]
    FilesystemConflict {
        package_id: Uuid,
        variant_id: Uuid,
        candidates: Vec<DirectoryCandidate>,
    },

    /// A destination file is held open by another process.
    #[error("{} is in use{}", path.display(), format_processes(processes))]
    AlreadyLocked {
        path: PathBuf,
        processes: Vec<String>,
    },

    #[error(transparent)]
    HostRegistration(#[from] HostError),

    /// A materialization of this version is already running.
    #[error("version {0} is already being materialized")]
    AlreadyInProgress(Uuid),

    /// The selection names groups the catalog does not have.
    #[error("selection references unknown groups: {}", groups.join(", "))]
    StaleSelection { groups: Vec<String> },

    /// A path would resolve outside the mod directory.
    #[error("path escapes the mod directory: {0}")]
    PathEscape(String),

    #[error("materialization cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(FsError),

    #[error(transparent)]
    Content(ContentError),

    #[error(transparent)]
    Resolve(ResolveError),

    #[error(transparent)]
    Manifest(ManifestError),

    #[error(transparent)]
    Import(ImportError),

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

fn format_processes(processes: &[String]) -> String {
    if processes.is_empty() {
        String::new()
    } else {
        format!(" by {}", processes.join(", "))
    }
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the failure is expected noise (entity gone upstream) rather
    /// than something worth reporting.
    pub fn is_missing_entity(&self) -> bool {
        matches!(self, Self::MissingEntity(_))
    }
}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        if e.is_missing_entity() {
            Self::MissingEntity(e)
        } else {
            Self::MetadataResolution(e)
        }
    }
}

impl From<FsError> for EngineError {
    fn from(e: FsError) -> Self {
        if e.kind == FsErrorKind::Locked {
            Self::AlreadyLocked {
                path: e.path,
                processes: e.processes,
            }
        } else {
            Self::Io(e)
        }
    }
}

impl From<ContentError> for EngineError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::Fs(fs) => fs.into(),
            ContentError::PathEscape(path) => Self::PathEscape(path),
            other => Self::Content(other),
        }
    }
}

impl From<TransferError> for EngineError {
    fn from(e: TransferError) -> Self {
        match e.root() {
            TransferError::Cancelled => return Self::Cancelled,
            TransferError::Integrity { expected, actual } => {
                return Self::Integrity {
                    expected: expected.clone(),
                    actual: actual.clone(),
                }
            }
            TransferError::Content(c) if c.is_locked() => {}
            _ => return Self::Transfer(e),
        }
        // Locked destination: unwrap down to the filesystem error.
        match e {
            TransferError::Exhausted { last, .. } => (*last).into(),
            TransferError::Content(c) => c.into(),
            other => Self::Transfer(other),
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::MultipleDirectories {
                package_id,
                variant_id,
                candidates,
            } => Self::FilesystemConflict {
                package_id,
                variant_id,
                candidates,
            },
            ResolveError::Fs(fs) => fs.into(),
            ResolveError::Catalog(c) => c.into(),
            other => Self::Resolve(other),
        }
    }
}

impl From<ManifestError> for EngineError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::PathEscape(path) => Self::PathEscape(path),
            ManifestError::Fs(fs) => fs.into(),
            other => Self::Manifest(other),
        }
    }
}

impl From<ImportError> for EngineError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::Cancelled => Self::Cancelled,
            ImportError::Fs(fs) => fs.into(),
            ImportError::Content(c) => c.into(),
            other => Self::Import(other),
        }
    }
}
