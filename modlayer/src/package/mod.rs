//! Package identity, directory naming and the per-mod sidecar manifest.

mod identity;
mod installed;
pub mod manifest;
mod naming;

pub use identity::{InstallScope, OptionSelection, PackageIdentity};
pub use installed::InstalledMod;
pub use manifest::{ManifestFileError, ManifestFileResult, ModManifest, MANIFEST_FILE};
pub use naming::{
    canonical_dir_name, decode_version, encode_version, legacy_dir_name, parse_dir_name,
    short_variant_id, slugify, NamingScheme, ParsedDirName, DIR_PREFIX, SHORT_VARIANT_LEN,
};
