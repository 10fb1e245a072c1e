//! Installed (managed) mod directories.

use std::ops::Deref;
use std::path::PathBuf;

use super::manifest::ModManifest;
use super::naming::{NamingScheme, ParsedDirName};

/// A managed directory found on disk.
///
/// Wraps the sidecar manifest with where it was found and how its directory
/// name parsed.
#[derive(Debug, Clone)]
pub struct InstalledMod {
    /// The sidecar manifest.
    pub manifest: ModManifest,

    /// Absolute path of the mod directory.
    pub path: PathBuf,

    /// Directory name (last path component).
    pub dir_name: String,

    /// Parsed directory name.
    pub parsed: ParsedDirName,
}

impl InstalledMod {
    pub fn new(manifest: ModManifest, path: PathBuf, dir_name: String, parsed: ParsedDirName) -> Self {
        Self {
            manifest,
            path,
            dir_name,
            parsed,
        }
    }

    pub fn scheme(&self) -> NamingScheme {
        self.parsed.scheme()
    }

    /// Whether the directory still uses the legacy naming scheme.
    pub fn needs_migration(&self) -> bool {
        self.scheme() == NamingScheme::Legacy
    }
}

impl Deref for InstalledMod {
    type Target = ModManifest;

    fn deref(&self) -> &Self::Target {
        &self.manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::manifest::tests::sample_manifest;
    use crate::package::naming::{legacy_dir_name, parse_dir_name};

    #[test]
    fn test_deref_and_migration_flag() {
        let manifest = sample_manifest();
        let dir_name = legacy_dir_name(manifest.id, &manifest.name, &manifest.version);
        let parsed = parse_dir_name(&dir_name).unwrap();
        let installed = InstalledMod::new(
            manifest.clone(),
            PathBuf::from("/mods").join(&dir_name),
            dir_name,
            parsed,
        );

        assert_eq!(installed.name, "Cool Hat");
        assert_eq!(installed.version_id, manifest.version_id);
        assert!(installed.needs_migration());
    }
}
