//! Package catalog: the remote service that resolves a version into groups,
//! options and needed files.
//!
//! The engine only talks to the [`Catalog`] trait. [`GraphQlCatalog`] is the
//! network implementation.

mod client;
mod graphql;
mod types;

pub use client::{Catalog, CatalogError, CatalogRequest, CatalogResult, DownloadKind};
pub use graphql::GraphQlCatalog;
pub use types::{
    BatchTable, BatchedFile, CombiningOptionInfo, ContainerInfo, DefaultOptionInfo,
    FileDestination, GroupInfo, GroupKind, ImcOptionInfo, NeededFiles, OptionInfo, PackageInfo,
    VariantInfo, VariantSummary, VersionInfo,
};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use uuid::Uuid;

    fn options(names: &[&str]) -> Vec<OptionInfo> {
        names
            .iter()
            .map(|n| OptionInfo {
                name: n.to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn group(name: &str, index: u32, kind: GroupKind) -> GroupInfo {
        GroupInfo {
            name: name.to_string(),
            description: String::new(),
            image: None,
            priority: 0,
            original_index: index,
            default_settings: 0,
            kind,
        }
    }

    pub fn single_group(name: &str, index: u32, names: &[&str]) -> GroupInfo {
        group(name, index, GroupKind::Single { options: options(names) })
    }

    pub fn multi_group(name: &str, index: u32, names: &[&str]) -> GroupInfo {
        group(name, index, GroupKind::Multi { options: options(names) })
    }

    pub fn imc_group(name: &str, index: u32, names: &[&str]) -> GroupInfo {
        group(
            name,
            index,
            GroupKind::Imc {
                options: names
                    .iter()
                    .enumerate()
                    .map(|(i, n)| ImcOptionInfo {
                        name: n.to_string(),
                        description: String::new(),
                        attribute_mask: 1 << i,
                        is_disable_sub_mod: false,
                    })
                    .collect(),
                identifier: serde_json::json!({ "PrimaryId": 1 }),
                default_entry: serde_json::json!({ "MaterialId": 1 }),
                all_variants: false,
                only_attributes: false,
                can_be_disabled: false,
            },
        )
    }

    pub fn combining_group(name: &str, index: u32, names: &[&str], containers: &[&str]) -> GroupInfo {
        group(
            name,
            index,
            GroupKind::Combining {
                options: names
                    .iter()
                    .map(|n| CombiningOptionInfo {
                        name: n.to_string(),
                        description: String::new(),
                    })
                    .collect(),
                containers: containers
                    .iter()
                    .map(|n| ContainerInfo {
                        name: n.to_string(),
                        file_swaps: Default::default(),
                        manipulations: Vec::new(),
                    })
                    .collect(),
            },
        )
    }

    pub fn version_info(groups: Vec<GroupInfo>, needed_files: NeededFiles) -> VersionInfo {
        VersionInfo {
            package: PackageInfo {
                id: Uuid::from_u128(1),
                name: "Cool Hat".to_string(),
                tagline: String::new(),
                description: "A very cool hat".to_string(),
                author: "someone".to_string(),
                website: None,
                tags: vec!["hat".to_string()],
                cover_image: None,
            },
            variant: VariantInfo {
                id: Uuid::from_u128(2),
                name: "Default".to_string(),
                is_default: true,
            },
            version: "1.0.0".to_string(),
            version_id: Uuid::from_u128(3),
            groups,
            default_option: None,
            needed_files,
            batched: false,
            batches: BatchTable::new(),
            mod_hash: None,
        }
    }

    /// In-memory catalog keyed by version and variant id.
    #[derive(Default)]
    pub struct MockCatalog {
        pub versions: parking_lot::Mutex<std::collections::HashMap<Uuid, VersionInfo>>,
        pub variants: std::collections::HashMap<Uuid, VariantSummary>,
        pub requests: parking_lot::Mutex<Vec<CatalogRequest>>,
    }

    impl MockCatalog {
        pub fn with_version(self, info: VersionInfo) -> Self {
            self.versions.lock().insert(info.version_id, info);
            self
        }

        pub fn with_variant(mut self, summary: VariantSummary) -> Self {
            self.variants.insert(summary.id, summary);
            self
        }
    }

    impl Catalog for MockCatalog {
        fn version<'a>(
            &'a self,
            request: &'a CatalogRequest,
        ) -> futures::future::BoxFuture<'a, CatalogResult<VersionInfo>> {
            self.requests.lock().push(request.clone());
            let found = self.versions.lock().get(&request.version_id).cloned();
            Box::pin(async move { found.ok_or(CatalogError::MissingVersion(request.version_id)) })
        }

        fn variant<'a>(
            &'a self,
            variant_id: Uuid,
        ) -> futures::future::BoxFuture<'a, CatalogResult<VariantSummary>> {
            let found = self.variants.get(&variant_id).cloned();
            Box::pin(async move { found.ok_or(CatalogError::MissingVariant(variant_id)) })
        }

        fn cover_image<'a>(
            &'a self,
            _package: &'a PackageInfo,
        ) -> futures::future::BoxFuture<'a, CatalogResult<Option<bytes::Bytes>>> {
            Box::pin(async { Err(CatalogError::Http("no cover in tests".to_string())) })
        }
    }
}
