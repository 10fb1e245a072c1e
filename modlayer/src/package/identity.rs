//! Package identity and option selection.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::GroupInfo;

/// (package, variant, version) triple from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub package_id: Uuid,
    pub variant_id: Uuid,
    pub version_id: Uuid,
}

impl PackageIdentity {
    pub fn new(package_id: Uuid, variant_id: Uuid, version_id: Uuid) -> Self {
        Self {
            package_id,
            variant_id,
            version_id,
        }
    }
}

/// Selected option names per group.
///
/// Insertion order is kept so a persisted selection reads back exactly as it
/// was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSelection(IndexMap<String, IndexSet<String>>);

impl OptionSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every option of every group.
    pub fn full(groups: &[GroupInfo]) -> Self {
        let mut selection = Self::new();
        for group in groups {
            let options = selection.0.entry(group.name.clone()).or_default();
            for name in group.option_names() {
                options.insert(name.to_string());
            }
        }
        selection
    }

    /// Add `option` to `group`'s selection.
    pub fn select(&mut self, group: impl Into<String>, option: impl Into<String>) {
        self.0.entry(group.into()).or_default().insert(option.into());
    }

    /// Builder form of [`select`](Self::select).
    pub fn with(mut self, group: impl Into<String>, option: impl Into<String>) -> Self {
        self.select(group, option);
        self
    }

    /// Mark a group as present with no options chosen.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.0.entry(group.into()).or_default();
        self
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.0.contains_key(group)
    }

    pub fn is_selected(&self, group: &str, option: &str) -> bool {
        self.0.get(group).is_some_and(|opts| opts.contains(option))
    }

    /// Options chosen for `group`, or `None` when the group is absent.
    pub fn options(&self, group: &str) -> Option<&IndexSet<String>> {
        self.0.get(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Group names not present in `groups`.
    pub fn unknown_groups(&self, groups: &[GroupInfo]) -> Vec<String> {
        self.0
            .keys()
            .filter(|name| !groups.iter().any(|g| &g.name == *name))
            .cloned()
            .collect()
    }

    /// Drop groups not present in `groups`, returning their names.
    pub fn retain_known(&mut self, groups: &[GroupInfo]) -> Vec<String> {
        let unknown = self.unknown_groups(groups);
        for name in &unknown {
            self.0.shift_remove(name);
        }
        unknown
    }

    /// Whether every option of every group is selected.
    pub fn covers_all(&self, groups: &[GroupInfo]) -> bool {
        groups.iter().all(|group| {
            group
                .option_names()
                .iter()
                .all(|option| self.is_selected(&group.name, option))
        })
    }
}

/// What the caller asked to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallScope {
    /// Every option of every group, resolved against the catalog response.
    Full,
    /// Exactly these options.
    Partial(OptionSelection),
}

impl InstallScope {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}
