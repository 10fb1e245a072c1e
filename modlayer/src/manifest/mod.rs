//! Host descriptor files: `meta.json`, `default_mod.json` and per-group
//! descriptors.

mod builder;
mod model;

use thiserror::Error;

use crate::content::FsError;
use crate::package::ManifestFileError;

pub use builder::{
    content_path, group_file_name, remove_group_files, validate_game_path, write_cover,
    ManifestBuilder, ModPack, UiDuplicate, MULTI_GROUP_WIDTH, PARTIAL_INSTALL_TAG, UI_PREFIX,
};
pub use model::{
    normalize_manipulation, CombiningContainer, CombiningGroup, CombiningOption, DefaultMod,
    FileMap, GroupFile, ImcGroup, ImcOption, ModMeta, OptionItem, StandardGroup, COVER_FILE,
    DEFAULT_MOD_FILE, META_FILE, META_FILE_VERSION,
};

/// Result type for manifest building.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors building or writing descriptor files.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("failed to serialize {file}: {source}")]
    Serialize {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// A game path would resolve outside the mod directory.
    #[error("game path escapes the mod directory: {0}")]
    PathEscape(String),

    #[error(transparent)]
    Sidecar(#[from] ManifestFileError),
}
