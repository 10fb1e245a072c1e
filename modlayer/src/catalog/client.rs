//! Catalog service interface.

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::package::OptionSelection;

use super::types::{PackageInfo, VariantSummary, VersionInfo};

/// Result type for catalog calls.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors from the catalog service.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transport-level failure.
    #[error("catalog request failed: {0}")]
    Http(String),

    /// Non-2xx response.
    #[error("catalog returned HTTP {0}")]
    Status(u16),

    /// The response carried a non-empty error list.
    #[error("catalog reported errors: {}", messages.join("; "))]
    Remote { messages: Vec<String> },

    /// The requested version no longer exists upstream.
    #[error("version {0} does not exist")]
    MissingVersion(Uuid),

    /// The requested variant no longer exists upstream.
    #[error("variant {0} does not exist")]
    MissingVariant(Uuid),

    /// The response could not be decoded.
    #[error("failed to parse catalog response: {0}")]
    Parse(String),
}

impl CatalogError {
    /// Whether the error means the entity is gone, as opposed to a failure
    /// to ask.
    pub fn is_missing_entity(&self) -> bool {
        matches!(self, Self::MissingVersion(_) | Self::MissingVariant(_))
    }
}

/// Whether the caller already has some version of this variant installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Install,
    Update,
}

/// Parameters for a version lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRequest {
    pub version_id: Uuid,
    /// Options to resolve files for; ignored on full installs.
    pub selection: OptionSelection,
    pub full: bool,
    pub access_code: Option<String>,
    pub kind: DownloadKind,
}

/// The package catalog.
///
/// Uses boxed futures so it can be held as `Arc<dyn Catalog>`.
pub trait Catalog: Send + Sync {
    /// Resolve a version into its group/option/file graph.
    fn version<'a>(&'a self, request: &'a CatalogRequest) -> BoxFuture<'a, CatalogResult<VersionInfo>>;

    /// Current name and package of a variant.
    fn variant<'a>(&'a self, variant_id: Uuid) -> BoxFuture<'a, CatalogResult<VariantSummary>>;

    /// Cover image bytes, if the package has one.
    fn cover_image<'a>(&'a self, package: &'a PackageInfo) -> BoxFuture<'a, CatalogResult<Option<Bytes>>>;
}
