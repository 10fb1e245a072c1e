//! Per-mod sidecar manifest (`modlayer.json`).
//!
//! Records what the directory currently contains: identity, display
//! metadata, the full/partial flag and the exact option selection used for
//! the last successful materialization. It is rewritten atomically.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::content::fs::{write_atomic, FsError};

use super::identity::{OptionSelection, PackageIdentity};
use super::naming::{canonical_dir_name, short_variant_id, slugify};

/// Sidecar file name inside a mod directory.
pub const MANIFEST_FILE: &str = "modlayer.json";

/// Current sidecar format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Result type for sidecar I/O.
pub type ManifestFileResult<T> = Result<T, ManifestFileError>;

/// Errors reading or writing the sidecar.
#[derive(Debug, Error)]
pub enum ManifestFileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Write(#[from] FsError),
}

/// Sidecar contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModManifest {
    #[serde(default = "default_manifest_version")]
    pub manifest_version: u32,
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub variant: String,
    pub variant_id: Uuid,
    pub version: String,
    pub version_id: Uuid,
    pub full_install: bool,
    #[serde(default)]
    pub include_tags: bool,
    #[serde(default)]
    pub selected_options: OptionSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_date: Option<DateTime<Utc>>,
}

fn default_manifest_version() -> u32 {
    MANIFEST_VERSION
}

impl ModManifest {
    /// Path of the sidecar inside `mod_dir`.
    pub fn path_in(mod_dir: &Path) -> PathBuf {
        mod_dir.join(MANIFEST_FILE)
    }

    /// Load the sidecar from `mod_dir`. A missing file is `Ok(None)`.
    pub fn load(mod_dir: &Path) -> ManifestFileResult<Option<Self>> {
        let path = Self::path_in(mod_dir);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ManifestFileError::Read { path, source: e }),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| ManifestFileError::Parse { path, source: e })
    }

    /// Write the sidecar into `mod_dir` (temp file + rename).
    pub fn save(&self, mod_dir: &Path) -> ManifestFileResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&Self::path_in(mod_dir), &json)?;
        Ok(())
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(self.id, self.variant_id, self.version_id)
    }

    /// The directory name this manifest's mod should live under.
    pub fn canonical_dir_name(&self) -> String {
        canonical_dir_name(
            self.id,
            &short_variant_id(&self.variant_id),
            &slugify(&self.name),
            &self.version,
        )
    }

    /// Whether `candidate` is newer than the recorded version.
    ///
    /// Versions are compared as semver when both parse (a leading `v` is
    /// tolerated); otherwise any difference counts as an update.
    pub fn is_update(&self, candidate: &str) -> bool {
        match (parse_semver(&self.version), parse_semver(candidate)) {
            (Some(current), Some(next)) => next > current,
            _ => candidate.trim() != self.version.trim(),
        }
    }
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed).ok()
}
