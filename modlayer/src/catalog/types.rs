//! Catalog response model.
//!
//! These types mirror what the catalog returns for one version: package and
//! variant metadata, ordered option groups, the needed-file graph and the
//! optional batch table. Manipulation payloads are kept as raw JSON values.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::content::extension_of;
use crate::package::OptionSelection;

/// `batch name -> hash -> location`.
pub type BatchTable = BTreeMap<String, BTreeMap<String, BatchedFile>>;

/// Location of one compressed blob inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedFile {
    pub offset: u64,
    pub size_compressed: u64,
    pub size_uncompressed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// URL of the cover image, if any.
    #[serde(default)]
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantInfo {
    pub id: Uuid,
    pub name: String,
    /// The package's default variant; its name is usually hidden.
    #[serde(default)]
    pub is_default: bool,
}

/// Variant lookup result used when renaming legacy directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub id: Uuid,
    pub name: String,
    pub package_id: Uuid,
    pub package_name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Option of a single/multi group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

/// Option of an IMC group (attribute toggle, no files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImcOptionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attribute_mask: u16,
    #[serde(default)]
    pub is_disable_sub_mod: bool,
}

/// Option of a combining group; its files live in containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombiningOptionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One option combination of a combining group. File destinations for a
/// container use the container name in the option slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

/// Group type and its type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GroupKind {
    /// Exactly one option active.
    Single { options: Vec<OptionInfo> },
    /// Any subset of options active.
    Multi { options: Vec<OptionInfo> },
    /// Attribute toggles on an IMC entry.
    Imc {
        options: Vec<ImcOptionInfo>,
        identifier: Value,
        default_entry: Value,
        #[serde(default)]
        all_variants: bool,
        #[serde(default)]
        only_attributes: bool,
        #[serde(default)]
        can_be_disabled: bool,
    },
    /// Options select one container out of every combination.
    Combining {
        options: Vec<CombiningOptionInfo>,
        containers: Vec<ContainerInfo>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Position in the author's original group order.
    pub original_index: u32,
    /// Default selection: an index for single groups, a bitmask otherwise.
    #[serde(default)]
    pub default_settings: u64,
    #[serde(flatten)]
    pub kind: GroupKind,
}

impl GroupInfo {
    /// Option names in catalog order.
    pub fn option_names(&self) -> Vec<&str> {
        match &self.kind {
            GroupKind::Single { options } | GroupKind::Multi { options } => {
                options.iter().map(|o| o.name.as_str()).collect()
            }
            GroupKind::Imc { options, .. } => options.iter().map(|o| o.name.as_str()).collect(),
            GroupKind::Combining { options, .. } => {
                options.iter().map(|o| o.name.as_str()).collect()
            }
        }
    }

    pub fn is_combining(&self) -> bool {
        matches!(self.kind, GroupKind::Combining { .. })
    }

    /// Host type name.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            GroupKind::Single { .. } => "Single",
            GroupKind::Multi { .. } => "Multi",
            GroupKind::Imc { .. } => "Imc",
            GroupKind::Combining { .. } => "Combining",
        }
    }
}

/// File swaps and manipulations that apply regardless of selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultOptionInfo {
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

/// Where one blob must appear. `group`/`option` of `None` marks a default
/// file needed regardless of selection.
///
/// Ordering is `(group, option, game_path)` with `None` first; sorted
/// destination lists are the tie-break for extension choice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(
    from = "(Option<String>, Option<String>, String)",
    into = "(Option<String>, Option<String>, String)"
)]
pub struct FileDestination {
    pub group: Option<String>,
    pub option: Option<String>,
    pub game_path: String,
}

impl FileDestination {
    pub fn new(group: Option<&str>, option: Option<&str>, game_path: &str) -> Self {
        Self {
            group: group.map(str::to_string),
            option: option.map(str::to_string),
            game_path: game_path.to_string(),
        }
    }

    /// A file needed regardless of selection.
    pub fn default_file(game_path: &str) -> Self {
        Self::new(None, None, game_path)
    }

    pub fn is_default(&self) -> bool {
        self.group.is_none()
    }
}

impl From<(Option<String>, Option<String>, String)> for FileDestination {
    fn from((group, option, game_path): (Option<String>, Option<String>, String)) -> Self {
        Self {
            group,
            option,
            game_path,
        }
    }
}

impl From<FileDestination> for (Option<String>, Option<String>, String) {
    fn from(dest: FileDestination) -> Self {
        (dest.group, dest.option, dest.game_path)
    }
}

/// The needed-file graph: hash to destinations, plus where to fetch blobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeededFiles {
    pub base_uri: String,
    pub files: BTreeMap<String, Vec<FileDestination>>,
}

impl NeededFiles {
    /// Sort and de-duplicate every destination list.
    pub fn normalized(mut self) -> Self {
        for destinations in self.files.values_mut() {
            destinations.sort();
            destinations.dedup();
        }
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn hashes(&self) -> HashSet<String> {
        self.files.keys().cloned().collect()
    }

    /// Extensions `hash` is needed under, primary first.
    ///
    /// Distinct non-empty extensions in sorted-destination order, followed by
    /// the empty extension when some destination has none.
    pub fn extensions_for(&self, hash: &str) -> Vec<String> {
        let Some(destinations) = self.files.get(hash) else {
            return Vec::new();
        };
        let mut sorted: Vec<&FileDestination> = destinations.iter().collect();
        sorted.sort();

        let mut extensions: Vec<String> = Vec::new();
        let mut bare = false;
        for dest in sorted {
            let ext = extension_of(&dest.game_path);
            if ext.is_empty() {
                bare = true;
            } else if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        if bare || extensions.is_empty() {
            extensions.push(String::new());
        }
        extensions
    }

    /// Restrict to what `selection` needs.
    ///
    /// Default files always stay. Combining groups are all-or-nothing, so
    /// their files stay whenever any of their options is selected. A hash
    /// left with no destinations is dropped.
    pub fn for_selection(&self, groups: &[GroupInfo], selection: &OptionSelection) -> NeededFiles {
        let keep = |dest: &FileDestination| -> bool {
            let Some(group) = dest.group.as_deref() else {
                return true;
            };
            let combining = groups.iter().any(|g| g.name == group && g.is_combining());
            match dest.option.as_deref() {
                _ if combining => selection.options(group).is_some_and(|opts| !opts.is_empty()),
                Some(option) => selection.is_selected(group, option),
                None => selection.options(group).is_some_and(|opts| !opts.is_empty()),
            }
        };

        let files = self
            .files
            .iter()
            .filter_map(|(hash, destinations)| {
                let kept: Vec<FileDestination> =
                    destinations.iter().filter(|d| keep(d)).cloned().collect();
                (!kept.is_empty()).then(|| (hash.clone(), kept))
            })
            .collect();

        NeededFiles {
            base_uri: self.base_uri.clone(),
            files,
        }
        .normalized()
    }
}

/// Everything the catalog reports for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub package: PackageInfo,
    pub variant: VariantInfo,
    pub version: String,
    pub version_id: Uuid,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
    #[serde(default)]
    pub default_option: Option<DefaultOptionInfo>,
    pub needed_files: NeededFiles,
    #[serde(default)]
    pub batched: bool,
    #[serde(default)]
    pub batches: BatchTable,
    #[serde(default)]
    pub mod_hash: Option<String>,
}

impl VersionInfo {
    /// Batch table, when the version is served batched.
    pub fn batch_table(&self) -> Option<&BatchTable> {
        (self.batched && !self.batches.is_empty()).then_some(&self.batches)
    }

    /// Decompressed size of `hash` if a batch lists it.
    pub fn uncompressed_size(&self, hash: &str) -> Option<u64> {
        self.batches
            .values()
            .find_map(|files| files.get(hash))
            .map(|f| f.size_uncompressed)
    }

    pub fn group(&self, name: &str) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.name == name)
    }
}
