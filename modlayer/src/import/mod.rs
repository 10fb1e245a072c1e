//! Adoption of unmanaged mod directories.
//!
//! An existing directory is hashed file by file and compared against the
//! needed-file set of the version it is supposed to be. After the caller has
//! confirmed the have/needed counts, [`ImportReconciler::commit`] moves the
//! matching files into the content store layout, deletes everything else and
//! renames the directory to its canonical name. The orchestrator then fills
//! in whatever is still missing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::NeededFiles;
use crate::content::fs::{self as cfs, walk_files, FsError};
use crate::content::{hash_file, ContentError, ContentStore, FILES_DIR};
use crate::progress::Progress;

/// Result type for imports.
pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("cannot move to {}: it already exists", .0.display())]
    TargetExists(PathBuf),

    #[error("import task failed: {0}")]
    Task(String),

    #[error("import cancelled")]
    Cancelled,
}

/// Content hash to every local file with that content, sorted.
pub type HashedFiles = BTreeMap<String, Vec<PathBuf>>;

/// Counts shown to the user before a destructive commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDiff {
    /// Needed hashes already present locally.
    pub have: usize,
    /// Needed hashes in total.
    pub needed: usize,
}

impl ImportDiff {
    /// Hashes still to download after the commit.
    pub fn missing(&self) -> usize {
        self.needed - self.have
    }
}

/// Result of the hashing half, waiting for confirmation.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub source: PathBuf,
    pub hashed: HashedFiles,
    pub needed: NeededFiles,
    pub diff: ImportDiff,
}

#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Directory after the rename.
    pub path: PathBuf,
    /// Files moved into the store.
    pub adopted: usize,
    /// Files and directories deleted.
    pub deleted: usize,
}

/// Hashes never worth matching: the host rewrites these on import.
fn is_host_metadata(game_path: &str) -> bool {
    game_path.to_ascii_lowercase().ends_with(".meta")
}

/// Needed files with host-metadata-only hashes dropped.
pub fn importable(needed: &NeededFiles) -> NeededFiles {
    NeededFiles {
        base_uri: needed.base_uri.clone(),
        files: needed
            .files
            .iter()
            .filter(|(_, dests)| dests.iter().any(|d| !is_host_metadata(&d.game_path)))
            .map(|(h, d)| (h.clone(), d.clone()))
            .collect(),
    }
}

/// Count needed hashes already present in `hashed`.
pub fn diff(hashed: &HashedFiles, needed: &NeededFiles) -> ImportDiff {
    ImportDiff {
        have: needed.files.keys().filter(|h| hashed.contains_key(*h)).count(),
        needed: needed.len(),
    }
}

/// Hashes, diffs and commits unmanaged directories.
#[derive(Debug, Clone)]
pub struct ImportReconciler {
    concurrency: usize,
}

impl ImportReconciler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Hash every file below `dir`, at most `concurrency` at a time.
    pub async fn hash_directory(
        &self,
        dir: &Path,
        progress: Arc<Progress>,
        cancel: &CancellationToken,
    ) -> ImportResult<HashedFiles> {
        if !dir.is_dir() {
            return Err(ImportError::NotADirectory(dir.to_path_buf()));
        }

        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| ImportError::Task(e.to_string()))??;
        progress.reset(files.len() as u32);
        tracing::info!(dir = %dir.display(), files = files.len(), "Hashing files for import");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let hashed: Arc<Mutex<HashMap<String, Vec<PathBuf>>>> = Arc::default();
        let mut tasks: JoinSet<ImportResult<()>> = JoinSet::new();

        for path in files {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ImportError::Cancelled),
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| ImportError::Cancelled)?
                }
            };

            let hashed = Arc::clone(&hashed);
            let progress = Arc::clone(&progress);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let hash = hash_file(&path).map_err(|source| ImportError::Hash {
                    path: path.clone(),
                    source,
                })?;
                hashed.lock().entry(hash).or_default().push(path);
                progress.advance();
                Ok(())
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ImportError::Cancelled),
                joined = tasks.join_next() => joined,
            };
            match joined {
                Some(result) => result.map_err(|e| ImportError::Task(e.to_string()))??,
                None => break,
            }
        }

        let mut collected = std::mem::take(&mut *hashed.lock());
        Ok(collected
            .drain()
            .map(|(hash, mut paths)| {
                paths.sort();
                (hash, paths)
            })
            .collect())
    }

    /// Hash `source` and compare it against `needed`.
    pub async fn prepare(
        &self,
        source: &Path,
        needed: &NeededFiles,
        progress: Arc<Progress>,
        cancel: &CancellationToken,
    ) -> ImportResult<ImportPlan> {
        let needed = importable(needed);
        let hashed = self.hash_directory(source, progress, cancel).await?;
        let diff = diff(&hashed, &needed);
        tracing::info!(have = diff.have, needed = diff.needed, "Import diff ready");

        Ok(ImportPlan {
            source: source.to_path_buf(),
            hashed,
            needed,
            diff,
        })
    }

    /// Move matched files into `files/`, delete the rest and rename the
    /// directory to `target_dir_name` beside it.
    ///
    /// Each matched hash is stored under one extension: the first non-empty
    /// extension among its destinations in sorted order.
    pub fn commit(&self, plan: &ImportPlan, target_dir_name: &str, progress: &Progress) -> ImportResult<CommitReport> {
        let source = &plan.source;
        let store = ContentStore::new(source);
        store.ensure_root()?;
        progress.reset(plan.diff.have as u32);

        let mut report = CommitReport::default();
        for hash in plan.needed.files.keys() {
            let Some(local) = plan.hashed.get(hash).and_then(|paths| paths.first()) else {
                continue;
            };
            let extension = plan
                .needed
                .extensions_for(hash)
                .into_iter()
                .next()
                .unwrap_or_default();
            let target = store.path_for(hash, &extension)?;
            if local != &target {
                if target.exists() {
                    cfs::remove_file(&target)?;
                }
                cfs::rename(local, &target)?;
            }
            report.adopted += 1;
            progress.advance();
        }

        report.deleted = delete_unmanaged(source, store.root())?;

        let parent = source.parent().unwrap_or(Path::new(""));
        let destination = parent.join(target_dir_name);
        if destination != *source {
            if destination.exists() {
                return Err(ImportError::TargetExists(destination));
            }
            cfs::rename(source, &destination)?;
        }

        tracing::info!(
            from = %source.display(),
            to = %destination.display(),
            adopted = report.adopted,
            deleted = report.deleted,
            "Committed import"
        );
        report.path = destination;
        Ok(report)
    }
}

/// Delete everything in `dir` except the store directory, and any
/// subdirectories inside the store.
fn delete_unmanaged(dir: &Path, store_root: &Path) -> ImportResult<usize> {
    let mut deleted = 0;
    for (parent, keep) in [(dir, Some(store_root)), (store_root, None)] {
        let entries = std::fs::read_dir(parent).map_err(|e| FsError::new("read directory", parent, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FsError::new("read directory", parent, e))?;
            let path = entry.path();
            if Some(path.as_path()) == keep {
                continue;
            }
            if path.is_dir() {
                cfs::remove_dir_all(&path)?;
                deleted += 1;
            } else if parent == dir {
                cfs::remove_file(&path)?;
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}
