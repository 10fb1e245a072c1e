//! Upgrade of legacy directory names.
//!
//! Legacy names lack the variant discriminator. Each one is renamed to the
//! current scheme using the variant's current name from the catalog, its
//! sidecar is updated, and the host is told about the rename.

use uuid::Uuid;

use crate::catalog::{Catalog, VariantSummary};
use crate::content::fs as cfs;
use crate::host::{HostError, Registrar, Registration, RegistrationRequest};

use super::{DirectoryResolver, ResolveError, ResolveResult};

/// One renamed directory.
#[derive(Debug, Clone)]
pub struct Migration {
    pub from: String,
    pub to: String,
    /// Host calls that failed while re-registering.
    pub warnings: Vec<HostError>,
}

impl DirectoryResolver {
    /// Rename every legacy directory of `package_id` (or of every package
    /// when `None`) to the current naming scheme.
    ///
    /// Variants the catalog no longer knows are left alone.
    pub async fn migrate_legacy<F>(
        &self,
        package_id: Option<Uuid>,
        catalog: &dyn Catalog,
        registrar: Option<&Registrar>,
        display_name: F,
    ) -> ResolveResult<Vec<Migration>>
    where
        F: Fn(&VariantSummary) -> String,
    {
        let legacy: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(|m| m.needs_migration() && package_id.map_or(true, |id| m.id == id))
            .collect();

        let mut migrations = Vec::with_capacity(legacy.len());
        for installed in legacy {
            let summary = match catalog.variant(installed.variant_id).await {
                Ok(summary) => summary,
                Err(e) if e.is_missing_entity() => {
                    tracing::warn!(dir = %installed.dir_name, error = %e, "Skipping migration of unknown variant");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut manifest = installed.manifest.clone();
            manifest.name = summary.package_name.clone();
            manifest.variant = summary.name.clone();
            manifest.variant_id = summary.id;

            let to = manifest.canonical_dir_name();
            let target = self.root.join(&to);
            if target.exists() {
                return Err(ResolveError::TargetExists(target));
            }

            tracing::info!(from = %installed.dir_name, to = %to, "Migrating legacy mod directory");
            cfs::rename(&installed.path, &target)?;
            manifest.save(&target)?;

            let warnings = match registrar {
                Some(registrar) => registrar.register(&RegistrationRequest {
                    dir_name: &to,
                    display_name: &display_name(&summary),
                    registration: Registration::Renamed {
                        old_dir_name: installed.dir_name.clone(),
                    },
                    collection: None,
                }),
                None => Vec::new(),
            };

            migrations.push(Migration {
                from: installed.dir_name,
                to,
                warnings,
            });
        }
        Ok(migrations)
    }
}
