//! Per-mod content-addressed file store.
//!
//! Layout: `<mod>/files/<hash>.<ext>`, or `<mod>/files/<hash>` when a file is
//! only ever needed without an extension. One physical file exists per hash;
//! every further extension is a hard link to it. Links are only ever made
//! from a file that has been hashed and found correct.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::fs::{self as cfs, FsErrorKind};
use super::hash::{hash_file, is_valid_hash};
use super::{ContentError, ContentResult};

/// Name of the store directory inside a mod directory.
pub const FILES_DIR: &str = "files";

const PARTIAL_SUFFIX: &str = ".partial";

/// Outcome of [`ContentStore::materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterializeOutcome {
    /// Links created for additional extensions.
    pub links_created: usize,
    /// Whether the primary path had to be re-derived from another extension.
    pub rederived: bool,
}

/// Outcome of [`ContentStore::prune`].
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub bytes_freed: u64,
}

/// The `files/` directory of one mod.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Store for the mod rooted at `mod_dir`.
    pub fn new(mod_dir: &Path) -> Self {
        Self {
            root: mod_dir.join(FILES_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory if needed.
    pub fn ensure_root(&self) -> ContentResult<()> {
        cfs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// File name for a (hash, extension) pair.
    pub fn file_name(hash: &str, extension: &str) -> String {
        if extension.is_empty() {
            hash.to_string()
        } else {
            format!("{}.{}", hash, extension)
        }
    }

    /// Canonical path for a (hash, extension) pair.
    ///
    /// Refuses anything that could resolve outside the store.
    pub fn path_for(&self, hash: &str, extension: &str) -> ContentResult<PathBuf> {
        if !is_valid_hash(hash) {
            return Err(ContentError::PathEscape(hash.to_string()));
        }
        if !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ContentError::PathEscape(format!("{}.{}", hash, extension)));
        }
        Ok(self.root.join(Self::file_name(hash, extension)))
    }

    /// Where an in-flight download for `hash` is written.
    pub fn partial_path(&self, hash: &str) -> ContentResult<PathBuf> {
        if !is_valid_hash(hash) {
            return Err(ContentError::PathEscape(hash.to_string()));
        }
        Ok(self.root.join(format!(".{}{}", hash, PARTIAL_SUFFIX)))
    }

    /// Cheap presence check: the file exists, and has the expected size when
    /// one is known. No hashing.
    pub fn has(&self, hash: &str, extension: &str, expected_size: Option<u64>) -> bool {
        let Ok(path) = self.path_for(hash, extension) else {
            return false;
        };
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => expected_size.map_or(true, |size| meta.len() == size),
            _ => false,
        }
    }

    /// Recompute the file's hash and compare. Missing files verify as `false`.
    pub fn verify(&self, hash: &str, extension: &str) -> ContentResult<bool> {
        let path = self.path_for(hash, extension)?;
        match hash_file(&path) {
            Ok(actual) => Ok(actual == hash),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ContentError::Io { path, source: e }),
        }
    }

    /// Path of the first extension in `extensions` whose file exists and
    /// verifies.
    ///
    /// A known size lets wrong-sized files be skipped without hashing them.
    pub fn locate_verified(
        &self,
        hash: &str,
        extensions: &[String],
        expected_size: Option<u64>,
    ) -> ContentResult<Option<PathBuf>> {
        for ext in extensions {
            if self.has(hash, ext, expected_size) && self.verify(hash, ext)? {
                return Ok(Some(self.path_for(hash, ext)?));
            }
        }
        Ok(None)
    }

    /// Make every extension in `extensions` a hard link to `source`.
    ///
    /// `source` must already be verified against `hash`; it is usually the
    /// path [`locate_verified`](Self::locate_verified) returned, or a fresh
    /// download just renamed onto the primary path. Whatever sits at any of
    /// the other paths is replaced unless it is already the same file, so a
    /// corrupt primary never wins over a good sibling.
    pub fn materialize(
        &self,
        hash: &str,
        extensions: &[String],
        source: &Path,
    ) -> ContentResult<MaterializeOutcome> {
        let Some(primary_ext) = extensions.first() else {
            return Ok(MaterializeOutcome::default());
        };
        if !source.is_file() {
            return Err(ContentError::Missing(hash.to_string()));
        }
        let primary = self.path_for(hash, primary_ext)?;
        let mut outcome = MaterializeOutcome::default();

        for ext in extensions {
            let path = self.path_for(hash, ext)?;
            if path == source || cfs::same_file(source, &path) {
                continue;
            }
            cfs::remove_file_if_exists(&path)?;
            cfs::hard_link(source, &path).map_err(link_error)?;

            if path == primary {
                outcome.rederived = true;
                tracing::debug!(hash = %hash, from = %source.display(), "Re-derived primary content file");
            } else {
                outcome.links_created += 1;
            }
        }

        Ok(outcome)
    }

    /// Name of the `index`th numbered copy of a (hash, extension) pair.
    pub fn duplicate_name(hash: &str, extension: &str, index: usize) -> String {
        format!("{}.{}.{}", hash, index, extension)
    }

    /// Hard-link the `index`th numbered copy to the stored file for
    /// (hash, extension). The stored file must already be materialized.
    pub fn link_duplicate(&self, hash: &str, extension: &str, index: usize) -> ContentResult<PathBuf> {
        if extension.is_empty() {
            return Err(ContentError::PathEscape(hash.to_string()));
        }
        let source = self.path_for(hash, extension)?;
        if !source.is_file() {
            return Err(ContentError::Missing(hash.to_string()));
        }
        let path = self.root.join(Self::duplicate_name(hash, extension, index));
        if cfs::same_file(&source, &path) {
            return Ok(path);
        }
        cfs::remove_file_if_exists(&path)?;
        cfs::hard_link(&source, &path).map_err(link_error)?;
        Ok(path)
    }

    /// Delete numbered copies whose file name is not in `keep`.
    pub fn remove_stale_duplicates(&self, keep: &HashSet<String>) -> ContentResult<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ContentError::Io {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ContentError::Io {
                path: self.root.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_duplicate(&name) || keep.contains(&name) {
                continue;
            }
            cfs::remove_file(&entry.path())?;
            tracing::debug!(file = %name, "Removed stale UI copy");
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete every file whose hash is not in `keep`, along with any leftover
    /// partial downloads. All extensions of a dropped hash go together.
    pub fn prune(&self, keep: &HashSet<String>) -> ContentResult<PruneReport> {
        let mut report = PruneReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(ContentError::Io {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|e| ContentError::Io {
                path: self.root.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_partial(&name) && keep.contains(hash_stem(&name)) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            cfs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "Removed stale content file");
            report.bytes_freed += size;
            report.removed.push(path);
        }

        Ok(report)
    }
}

/// The hash part of a store file name.
pub fn hash_stem(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// `<hash>.<n>.<ext>` names produced by [`ContentStore::duplicate_name`].
fn is_duplicate(file_name: &str) -> bool {
    let parts: Vec<&str> = file_name.split('.').collect();
    parts.len() == 3
        && !parts[1].is_empty()
        && parts[1].bytes().all(|b| b.is_ascii_digit())
        && is_valid_hash(parts[0])
}

fn is_partial(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(PARTIAL_SUFFIX)
}

fn link_error(err: cfs::FsError) -> ContentError {
    if err.kind == FsErrorKind::CrossDevice {
        ContentError::HardLinkUnsupported(err)
    } else {
        ContentError::Fs(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::hash_bytes;
    use tempfile::TempDir;

    fn store_with(data: &[u8], ext: &str) -> (TempDir, ContentStore, String) {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        store.ensure_root().unwrap();
        let hash = hash_bytes(data);
        fs::write(store.path_for(&hash, ext).unwrap(), data).unwrap();
        (temp, store, hash)
    }

    #[test]
    fn test_path_for_empty_extension() {
        let store = ContentStore::new(Path::new("/mods/x"));
        let hash = hash_bytes(b"a");
        assert_eq!(
            store.path_for(&hash, "").unwrap(),
            PathBuf::from("/mods/x/files").join(&hash)
        );
    }

    #[test]
    fn test_path_for_rejects_escape() {
        let store = ContentStore::new(Path::new("/mods/x"));
        assert!(matches!(
            store.path_for("../../boom", "tex"),
            Err(ContentError::PathEscape(_))
        ));
        let hash = hash_bytes(b"a");
        assert!(store.path_for(&hash, "t/x").is_err());
    }

    #[test]
    fn test_has_checks_size() {
        let (_temp, store, hash) = store_with(b"12345", "mdl");
        assert!(store.has(&hash, "mdl", None));
        assert!(store.has(&hash, "mdl", Some(5)));
        assert!(!store.has(&hash, "mdl", Some(6)));
        assert!(!store.has(&hash, "tex", None));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (_temp, store, hash) = store_with(b"payload", "mtrl");
        assert!(store.verify(&hash, "mtrl").unwrap());

        fs::write(store.path_for(&hash, "mtrl").unwrap(), b"tampered").unwrap();
        assert!(!store.verify(&hash, "mtrl").unwrap());
        assert!(!store.verify(&hash, "tex").unwrap());
    }

    #[test]
    fn test_materialize_links_extensions() {
        let (_temp, store, hash) = store_with(b"shared", "tex");
        let exts = vec!["tex".to_string(), "atex".to_string()];
        let source = store.path_for(&hash, "tex").unwrap();

        let outcome = store.materialize(&hash, &exts, &source).unwrap();
        assert_eq!(outcome.links_created, 1);
        assert!(!outcome.rederived);
        assert!(cfs::same_file(&source, &store.path_for(&hash, "atex").unwrap()));

        // Second pass is a no-op.
        let outcome = store.materialize(&hash, &exts, &source).unwrap();
        assert_eq!(outcome.links_created, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_single_physical_copy() {
        use std::os::unix::fs::MetadataExt;

        let (_temp, store, hash) = store_with(b"shared", "tex");
        let source = store.path_for(&hash, "tex").unwrap();
        store
            .materialize(&hash, &["tex".to_string(), "atex".to_string()], &source)
            .unwrap();
        let meta = fs::metadata(store.path_for(&hash, "tex").unwrap()).unwrap();
        assert_eq!(meta.nlink(), 2);
    }

    #[test]
    fn test_materialize_rederives_primary() {
        let (_temp, store, hash) = store_with(b"old order", "atex");
        let exts = vec!["tex".to_string(), "atex".to_string()];

        let source = store.locate_verified(&hash, &exts, None).unwrap().unwrap();
        assert_eq!(source, store.path_for(&hash, "atex").unwrap());

        let outcome = store.materialize(&hash, &exts, &source).unwrap();
        assert!(outcome.rederived);
        assert!(store.verify(&hash, "tex").unwrap());
    }

    #[test]
    fn test_materialize_replaces_corrupt_primary() {
        let (_temp, store, hash) = store_with(b"good texture", "atex");
        let tex = store.path_for(&hash, "tex").unwrap();
        fs::write(&tex, b"corrupt").unwrap();
        let exts = vec!["tex".to_string(), "atex".to_string()];

        let source = store.locate_verified(&hash, &exts, None).unwrap().unwrap();
        assert_eq!(source, store.path_for(&hash, "atex").unwrap());

        let outcome = store.materialize(&hash, &exts, &source).unwrap();
        assert!(outcome.rederived);
        assert!(store.verify(&hash, "tex").unwrap());
        assert!(store.verify(&hash, "atex").unwrap());
        assert!(cfs::same_file(&tex, &source));
    }

    #[test]
    fn test_locate_verified_skips_corrupt_files() {
        let (_temp, store, hash) = store_with(b"real", "tex");
        fs::write(store.path_for(&hash, "tex").unwrap(), b"fake").unwrap();
        let exts = vec!["tex".to_string(), "atex".to_string()];
        assert!(store.locate_verified(&hash, &exts, None).unwrap().is_none());
    }

    #[test]
    fn test_materialize_missing_everything() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        store.ensure_root().unwrap();
        let hash = hash_bytes(b"nothing");

        let source = store.path_for(&hash, "tex").unwrap();
        let err = store
            .materialize(&hash, &["tex".to_string()], &source)
            .unwrap_err();
        assert!(matches!(err, ContentError::Missing(_)));
    }

    #[test]
    fn test_materialize_replaces_foreign_link() {
        let (_temp, store, hash) = store_with(b"real", "tex");
        fs::write(store.path_for(&hash, "atex").unwrap(), b"real").unwrap();
        let source = store.path_for(&hash, "tex").unwrap();

        let outcome = store
            .materialize(&hash, &["tex".to_string(), "atex".to_string()], &source)
            .unwrap();
        assert_eq!(outcome.links_created, 1);
    }

    #[test]
    fn test_prune_removes_all_extensions_of_dropped_hash() {
        let (_temp, store, keep_hash) = store_with(b"keep", "tex");
        let drop_hash = hash_bytes(b"drop");
        fs::write(store.path_for(&drop_hash, "tex").unwrap(), b"drop").unwrap();
        fs::write(store.path_for(&drop_hash, "atex").unwrap(), b"drop").unwrap();
        fs::write(store.partial_path(&keep_hash).unwrap(), b"half").unwrap();

        let keep: HashSet<String> = [keep_hash.clone()].into_iter().collect();
        let report = store.prune(&keep).unwrap();

        assert_eq!(report.removed.len(), 3);
        assert!(store.has(&keep_hash, "tex", None));
        assert!(!store.has(&drop_hash, "tex", None));
        assert!(!store.has(&drop_hash, "atex", None));
    }

    #[test]
    fn test_prune_missing_root() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(&temp.path().join("absent"));
        let report = store.prune(&HashSet::new()).unwrap();
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_link_duplicate_shares_stored_file() {
        let (_temp, store, hash) = store_with(b"icon", "tex");
        let source = store.path_for(&hash, "tex").unwrap();

        let first = store.link_duplicate(&hash, "tex", 1).unwrap();
        let second = store.link_duplicate(&hash, "tex", 2).unwrap();
        assert_eq!(first.file_name().unwrap().to_string_lossy(), format!("{}.1.tex", hash));
        assert!(cfs::same_file(&source, &first));
        assert!(cfs::same_file(&source, &second));

        // Linking again is a no-op; a stray file in the way is replaced.
        store.link_duplicate(&hash, "tex", 1).unwrap();
        fs::write(&second, b"stray").unwrap();
        store.link_duplicate(&hash, "tex", 2).unwrap();
        assert_eq!(fs::read(&second).unwrap(), b"icon");
    }

    #[test]
    fn test_link_duplicate_needs_stored_file() {
        let (_temp, store, hash) = store_with(b"icon", "tex");
        assert!(matches!(
            store.link_duplicate(&hash, "atex", 1),
            Err(ContentError::Missing(_))
        ));
    }

    #[test]
    fn test_remove_stale_duplicates_keeps_listed_copies() {
        let (_temp, store, hash) = store_with(b"icon", "tex");
        store.link_duplicate(&hash, "tex", 1).unwrap();
        store.link_duplicate(&hash, "tex", 2).unwrap();
        store.link_duplicate(&hash, "tex", 3).unwrap();

        let keep: HashSet<String> = (1..=2)
            .map(|i| ContentStore::duplicate_name(&hash, "tex", i))
            .collect();
        assert_eq!(store.remove_stale_duplicates(&keep).unwrap(), 1);
        assert!(store.root().join(ContentStore::duplicate_name(&hash, "tex", 2)).exists());
        assert!(!store.root().join(ContentStore::duplicate_name(&hash, "tex", 3)).exists());
        // The stored file itself is never a numbered copy.
        assert!(store.has(&hash, "tex", None));
    }

    #[test]
    fn test_prune_keeps_duplicates_of_kept_hash() {
        let (_temp, store, hash) = store_with(b"icon", "tex");
        store.link_duplicate(&hash, "tex", 1).unwrap();
        let keep: HashSet<String> = [hash.clone()].into_iter().collect();
        assert!(store.prune(&keep).unwrap().removed.is_empty());
    }

    #[test]
    fn test_hash_stem() {
        assert_eq!(hash_stem("abc.tex"), "abc");
        assert_eq!(hash_stem("abc"), "abc");
    }
}
