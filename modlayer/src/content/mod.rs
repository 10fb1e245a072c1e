//! Content-addressed storage for mod files.
//!
//! - [`hash`]: content hash function and streaming hash writer
//! - [`fs`]: filesystem helpers returning tagged error kinds
//! - [`store`]: the per-mod `files/` store

pub mod fs;
pub mod hash;
pub mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use fs::{FsError, FsErrorKind, FsResult};
pub use hash::{hash_bytes, hash_file, is_valid_hash, HashingWriter, HASH_LEN};
pub use store::{ContentStore, MaterializeOutcome, PruneReport, FILES_DIR};

/// Result type for content store operations.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors from the content store.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),

    /// The destination filesystem cannot hard link (cross-volume or network share).
    #[error("hard links are not supported here: {0}")]
    HardLinkUnsupported(#[source] FsError),

    /// No file for the hash exists under any of its extensions.
    #[error("no stored file for hash {0}")]
    Missing(String),

    /// A hash or extension would resolve outside the store directory.
    #[error("refusing path outside the content store: {0}")]
    PathEscape(String),
}

impl ContentError {
    /// Whether the failure is a file held open by another process.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Fs(e) if e.kind == FsErrorKind::Locked)
    }
}

/// Lower-cased extension of a game path, without the dot.
///
/// Returns an empty string when the final segment has no usable extension.
/// Only ASCII alphanumerics survive so the result is always safe to use in a
/// store file name.
///
/// # Examples
///
/// ```
/// use modlayer::content::extension_of;
///
/// assert_eq!(extension_of("chara/equipment/e0001/texture/v01_c0101e0001_top_n.TEX"), "tex");
/// assert_eq!(extension_of("ui/icon/000000/000001"), "");
/// assert_eq!(extension_of("weird/dir.name/file"), "");
/// ```
pub fn extension_of(game_path: &str) -> String {
    let last = game_path.rsplit(['/', '\\']).next().unwrap_or(game_path);
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of_strips_unsafe_chars() {
        assert_eq!(extension_of("a/b.t$x"), "tx");
        assert_eq!(extension_of(".hidden"), "");
        assert_eq!(extension_of("a\\b\\c.Mdl"), "mdl");
    }
}
