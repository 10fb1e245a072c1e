//! Mod directory placement.
//!
//! Finds the managed directories of a package under the mod root, decides
//! whether a materialization is a fresh install, a reinstall in place or a
//! rename of an older version's directory, and upgrades legacy directory
//! names. Conflicts are reported, never resolved by deleting anything.

mod migration;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::content::fs::{self as cfs, FsError};
use crate::package::{parse_dir_name, InstalledMod, ManifestFileError, ModManifest};

pub use migration::Migration;

/// Result type for directory resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// One directory claiming a package variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCandidate {
    pub path: PathBuf,
    pub version: String,
}

impl fmt::Display for DirectoryCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.path.display(), self.version)
    }
}

fn join_candidates(candidates: &[DirectoryCandidate]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read mod root {}: {source}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// More than one directory claims the same package variant.
    #[error("multiple directories for package {package_id} variant {variant_id}: {}", join_candidates(candidates))]
    MultipleDirectories {
        package_id: Uuid,
        variant_id: Uuid,
        candidates: Vec<DirectoryCandidate>,
    },

    /// A rename target is already taken by something else.
    #[error("cannot move to {}: it already exists", .0.display())]
    TargetExists(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Sidecar(#[from] ManifestFileError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// How the target directory relates to what is on disk.
#[derive(Debug, Clone)]
pub enum Placement {
    /// No directory exists for the variant.
    Fresh,
    /// The directory already has the target name.
    Reinstall(InstalledMod),
    /// An older directory must be renamed to the target name.
    Rename(InstalledMod),
}

impl Placement {
    /// Directory on disk before placement, if any.
    pub fn existing(&self) -> Option<&InstalledMod> {
        match self {
            Self::Fresh => None,
            Self::Reinstall(m) | Self::Rename(m) => Some(m),
        }
    }
}

/// Where a materialization writes.
#[derive(Debug, Clone)]
pub struct ResolvedDirectory {
    pub dir_name: String,
    pub path: PathBuf,
    pub placement: Placement,
}

/// Scans and arranges managed directories under one mod root.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every managed directory with a readable sidecar, sorted by name.
    ///
    /// Directories whose name does not parse are ignored. A sidecar that
    /// disagrees with its directory name about the package is skipped with
    /// a warning.
    pub fn scan(&self) -> ResolveResult<Vec<InstalledMod>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ResolveError::ReadRoot {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut installed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ResolveError::ReadRoot {
                path: self.root.clone(),
                source: e,
            })?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let Some(parsed) = parse_dir_name(&dir_name) else {
                continue;
            };

            let path = entry.path();
            let manifest = match ModManifest::load(&path) {
                Ok(Some(manifest)) => manifest,
                Ok(None) => {
                    tracing::debug!(dir = %dir_name, "Managed-looking directory has no sidecar");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(dir = %dir_name, error = %e, "Unreadable sidecar");
                    continue;
                }
            };
            if manifest.id != parsed.package_id {
                tracing::warn!(
                    dir = %dir_name,
                    sidecar_package = %manifest.id,
                    "Sidecar package does not match directory name"
                );
                continue;
            }

            installed.push(InstalledMod::new(manifest, path, dir_name, parsed));
        }

        installed.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(installed)
    }

    /// Directories belonging to `package_id`.
    pub fn find_existing(&self, package_id: Uuid) -> ResolveResult<Vec<InstalledMod>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|m| m.id == package_id)
            .collect())
    }

    /// The single directory of a package variant, if any.
    pub fn find_for_variant(&self, package_id: Uuid, variant_id: Uuid) -> ResolveResult<Option<InstalledMod>> {
        let mut found: Vec<InstalledMod> = self
            .find_existing(package_id)?
            .into_iter()
            .filter(|m| m.variant_id == variant_id)
            .collect();

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(ResolveError::MultipleDirectories {
                package_id,
                variant_id,
                candidates: found
                    .iter()
                    .map(|m| DirectoryCandidate {
                        path: m.path.clone(),
                        version: m.version.clone(),
                    })
                    .collect(),
            }),
        }
    }

    /// Decide where a variant should be written as `dir_name`.
    pub fn locate(&self, package_id: Uuid, variant_id: Uuid, dir_name: &str) -> ResolveResult<ResolvedDirectory> {
        let placement = match self.find_for_variant(package_id, variant_id)? {
            None => Placement::Fresh,
            Some(existing) if existing.dir_name == dir_name => Placement::Reinstall(existing),
            Some(existing) => Placement::Rename(existing),
        };

        Ok(ResolvedDirectory {
            dir_name: dir_name.to_string(),
            path: self.root.join(dir_name),
            placement,
        })
    }

    /// Make the resolved directory exist: create it, or move the old one
    /// into place.
    pub fn apply(&self, resolved: &ResolvedDirectory) -> ResolveResult<()> {
        match &resolved.placement {
            Placement::Rename(existing) => {
                if resolved.path.exists() {
                    return Err(ResolveError::TargetExists(resolved.path.clone()));
                }
                tracing::info!(
                    from = %existing.dir_name,
                    to = %resolved.dir_name,
                    "Renaming mod directory"
                );
                cfs::rename(&existing.path, &resolved.path)?;
            }
            Placement::Fresh | Placement::Reinstall(_) => cfs::create_dir_all(&resolved.path)?,
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::manifest::tests::sample_manifest;
    use tempfile::TempDir;

    /// Write a managed directory for `manifest` under `root`.
    pub(crate) fn install(root: &Path, manifest: &ModManifest, dir_name: &str) -> PathBuf {
        let path = root.join(dir_name);
        std::fs::create_dir_all(&path).unwrap();
        manifest.save(&path).unwrap();
        path
    }

    #[test]
    fn test_scan_ignores_unmanaged() {
        let temp = TempDir::new().unwrap();
        let manifest = sample_manifest();
        install(temp.path(), &manifest, &manifest.canonical_dir_name());
        std::fs::create_dir(temp.path().join("Some Other Mod")).unwrap();
        std::fs::write(temp.path().join("loose.txt"), b"x").unwrap();

        let resolver = DirectoryResolver::new(temp.path());
        let found = resolver.scan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version_id, manifest.version_id);
    }

    #[test]
    fn test_scan_missing_root() {
        let temp = TempDir::new().unwrap();
        let resolver = DirectoryResolver::new(temp.path().join("nope"));
        assert!(resolver.scan().unwrap().is_empty());
    }

    #[test]
    fn test_locate_fresh_reinstall_rename() {
        let temp = TempDir::new().unwrap();
        let resolver = DirectoryResolver::new(temp.path());
        let manifest = sample_manifest();
        let current = manifest.canonical_dir_name();

        let fresh = resolver.locate(manifest.id, manifest.variant_id, &current).unwrap();
        assert!(matches!(fresh.placement, Placement::Fresh));

        install(temp.path(), &manifest, &current);
        let again = resolver.locate(manifest.id, manifest.variant_id, &current).unwrap();
        assert!(matches!(again.placement, Placement::Reinstall(_)));

        let mut next = manifest.clone();
        next.version = "2.0.0".to_string();
        let target = next.canonical_dir_name();
        let moved = resolver.locate(manifest.id, manifest.variant_id, &target).unwrap();
        assert!(matches!(&moved.placement, Placement::Rename(m) if m.dir_name == current));

        resolver.apply(&moved).unwrap();
        assert!(!temp.path().join(&current).exists());
        assert!(temp.path().join(&target).join(crate::package::MANIFEST_FILE).exists());
    }

    #[test]
    fn test_multiple_directories_conflict() {
        let temp = TempDir::new().unwrap();
        let resolver = DirectoryResolver::new(temp.path());
        let manifest = sample_manifest();
        let first = install(temp.path(), &manifest, &manifest.canonical_dir_name());

        let mut other = manifest.clone();
        other.version = "0.9.0".to_string();
        let second = install(temp.path(), &other, &other.canonical_dir_name());

        match resolver.locate(manifest.id, manifest.variant_id, "ml-whatever") {
            Err(ResolveError::MultipleDirectories { candidates, .. }) => {
                let paths: Vec<&PathBuf> = candidates.iter().map(|c| &c.path).collect();
                assert!(paths.contains(&&first));
                assert!(paths.contains(&&second));
                assert!(candidates.iter().any(|c| c.version == "0.9.0"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        // Nothing was deleted.
        assert!(first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_other_variant_is_not_a_conflict() {
        let temp = TempDir::new().unwrap();
        let resolver = DirectoryResolver::new(temp.path());
        let manifest = sample_manifest();
        install(temp.path(), &manifest, &manifest.canonical_dir_name());

        let mut alt = manifest.clone();
        alt.variant_id = Uuid::from_u128(0xabcdef01 << 96);
        install(temp.path(), &alt, &alt.canonical_dir_name());

        assert_eq!(resolver.find_existing(manifest.id).unwrap().len(), 2);
        assert!(resolver
            .find_for_variant(manifest.id, manifest.variant_id)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let temp = TempDir::new().unwrap();
        let resolver = DirectoryResolver::new(temp.path());
        let manifest = sample_manifest();
        install(temp.path(), &manifest, &manifest.canonical_dir_name());

        let target = "ml-Cool Hat-2.0.0-00000000-00000000000000000000000000000001";
        std::fs::create_dir(temp.path().join(target)).unwrap();
        let resolved = resolver.locate(manifest.id, manifest.variant_id, target).unwrap();
        assert!(matches!(resolver.apply(&resolved), Err(ResolveError::TargetExists(_))));
    }
}
