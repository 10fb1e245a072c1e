//! Requests and results of materialization runs.

use std::path::PathBuf;

use uuid::Uuid;

use crate::fetch::FetchReport;
use crate::host::HostError;
use crate::import::{ImportDiff, ImportPlan};
use crate::package::{InstallScope, PackageIdentity};
use crate::resolver::Migration;

/// What to materialize and how.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationRequest {
    pub identity: PackageIdentity,
    /// Mod root to write under. Falls back to the configured override, then
    /// to the host.
    pub mod_root: Option<PathBuf>,
    pub scope: InstallScope,
    pub access_code: Option<String>,
    /// Copy package tags into the host descriptor.
    pub include_tags: bool,
    pub register_with_host: bool,
    /// Collection to enable the mod in after registration.
    pub collection: Option<Uuid>,
    /// Directory name the host knew an imported directory under.
    pub adopt_from: Option<String>,
}

impl MaterializationRequest {
    pub fn new(identity: PackageIdentity, scope: InstallScope) -> Self {
        Self {
            identity,
            mod_root: None,
            scope,
            access_code: None,
            include_tags: true,
            register_with_host: true,
            collection: None,
            adopt_from: None,
        }
    }

    pub fn with_mod_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mod_root = Some(root.into());
        self
    }

    pub fn with_access_code(mut self, code: impl Into<String>) -> Self {
        self.access_code = Some(code.into());
        self
    }

    pub fn with_include_tags(mut self, include: bool) -> Self {
        self.include_tags = include;
        self
    }

    pub fn with_register_with_host(mut self, register: bool) -> Self {
        self.register_with_host = register;
        self
    }

    pub fn with_collection(mut self, collection: Uuid) -> Self {
        self.collection = Some(collection);
        self
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct MaterializationOutcome {
    pub identity: PackageIdentity,
    pub dir_name: String,
    pub path: PathBuf,
    pub full_install: bool,
    pub fetch: FetchReport,
    /// Stale content files deleted after fetching.
    pub pruned: usize,
    /// Selected groups the catalog did not know.
    pub unknown_groups: Vec<String>,
    /// Failed host calls; content on disk is unaffected.
    pub host_warnings: Vec<HostError>,
    /// Legacy directories renamed before the run.
    pub migrations: Vec<Migration>,
    /// Access code the catalog accepted, for the caller to remember.
    pub access_code: Option<String>,
}

/// A hashed import waiting for confirmation.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub plan: ImportPlan,
    /// Directory name the import will be renamed to.
    pub dir_name: String,
    pub(crate) request: MaterializationRequest,
}

impl PendingImport {
    /// Counts to show before committing.
    pub fn diff(&self) -> ImportDiff {
        self.plan.diff
    }
}
