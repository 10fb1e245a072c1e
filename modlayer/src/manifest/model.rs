//! Host descriptor file formats.
//!
//! `meta.json`, `default_mod.json` and one `group_NNN_<slug>.json` per option
//! group. Field names are PascalCase because that is what the host reads.
//! Manipulation records are opaque JSON values and are never interpreted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host descriptor file name.
pub const META_FILE: &str = "meta.json";

/// Default file mapping file name.
pub const DEFAULT_MOD_FILE: &str = "default_mod.json";

/// Cover image file name.
pub const COVER_FILE: &str = "cover.jpg";

/// Descriptor format version understood by the host.
pub const META_FILE_VERSION: u32 = 3;

/// Game path to content path, in insertion order.
pub type FileMap = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModMeta {
    pub file_version: u32,
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default)]
    pub mod_tags: Vec<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub import_date: i64,
}

/// Files active regardless of option selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultMod {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

/// Single or multi group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StandardGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub default_settings: u64,
    #[serde(default)]
    pub options: Vec<OptionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImcOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_disable_sub_mod: bool,
    #[serde(default)]
    pub attribute_mask: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImcGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub default_settings: u64,
    pub identifier: Value,
    #[serde(default)]
    pub all_variants: bool,
    #[serde(default)]
    pub only_attributes: bool,
    #[serde(default)]
    pub can_be_disabled: bool,
    pub default_entry: Value,
    #[serde(default)]
    pub options: Vec<ImcOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombiningOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One option combination of a combining group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombiningContainer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default)]
    pub file_swaps: IndexMap<String, String>,
    #[serde(default)]
    pub manipulations: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombiningGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub default_settings: u64,
    #[serde(default)]
    pub options: Vec<CombiningOption>,
    #[serde(default)]
    pub containers: Vec<CombiningContainer>,
}

/// One group descriptor file. The `Type` key is written first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum GroupFile {
    Single(StandardGroup),
    Multi(StandardGroup),
    Imc(ImcGroup),
    Combining(CombiningGroup),
}

impl GroupFile {
    pub fn name(&self) -> &str {
        match self {
            Self::Single(g) | Self::Multi(g) => &g.name,
            Self::Imc(g) => &g.name,
            Self::Combining(g) => &g.name,
        }
    }

    pub fn default_settings(&self) -> u64 {
        match self {
            Self::Single(g) | Self::Multi(g) => g.default_settings,
            Self::Imc(g) => g.default_settings,
            Self::Combining(g) => g.default_settings,
        }
    }

    pub fn option_names(&self) -> Vec<&str> {
        match self {
            Self::Single(g) | Self::Multi(g) => g.options.iter().map(|o| o.name.as_str()).collect(),
            Self::Imc(g) => g.options.iter().map(|o| o.name.as_str()).collect(),
            Self::Combining(g) => g.options.iter().map(|o| o.name.as_str()).collect(),
        }
    }

    pub fn option_count(&self) -> usize {
        match self {
            Self::Single(g) | Self::Multi(g) => g.options.len(),
            Self::Imc(g) => g.options.len(),
            Self::Combining(g) => g.options.len(),
        }
    }
}

/// Reorder a manipulation record so its `Type` key comes first.
///
/// Anything that is not an object, or has no `Type` key, is returned as is.
pub fn normalize_manipulation(value: &Value) -> Value {
    let Value::Object(object) = value else {
        return value.clone();
    };
    let Some(kind) = object.get("Type") else {
        return value.clone();
    };

    let mut reordered = Map::with_capacity(object.len());
    reordered.insert("Type".to_string(), kind.clone());
    for (key, field) in object {
        if key != "Type" {
            reordered.insert(key.clone(), field.clone());
        }
    }
    Value::Object(reordered)
}
