//! External mod-manager host.
//!
//! The engine only sees the narrow [`ModHost`] capability interface. An
//! embedding application implements it over whatever IPC the host offers.
//! Every call is fallible and best-effort: a failure changes the host's view
//! of a mod, never the content on disk.

mod registrar;

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::package::OptionSelection;

pub use registrar::{Registrar, Registration, RegistrationRequest};

/// Result type for host calls.
pub type HostResult<T> = Result<T, HostError>;

/// A failed host call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host {operation} failed for {target}: {reason}")]
pub struct HostError {
    pub operation: &'static str,
    /// Directory name (or other subject) of the call.
    pub target: String,
    pub reason: String,
}

impl HostError {
    pub fn new(operation: &'static str, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// A mod as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMod {
    pub dir_name: String,
    pub display_name: String,
}

/// Per-collection settings of one mod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModSettings {
    pub enabled: bool,
    pub priority: i32,
    pub options: OptionSelection,
}

/// Operations the engine needs from the host.
///
/// Mods are addressed by directory name relative to [`mod_root`](Self::mod_root).
pub trait ModHost: Send + Sync {
    /// Root directory mods live in.
    fn mod_root(&self) -> HostResult<PathBuf>;

    fn add_mod(&self, dir_name: &str) -> HostResult<()>;

    fn reload_mod(&self, dir_name: &str) -> HostResult<()>;

    fn delete_mod(&self, dir_name: &str) -> HostResult<()>;

    /// Display path (folder plus sort name) of a mod, if registered.
    fn mod_path(&self, dir_name: &str) -> HostResult<Option<String>>;

    fn set_mod_path(&self, dir_name: &str, path: &str) -> HostResult<()>;

    /// Copy every collection's settings from one directory name to another.
    fn copy_mod_settings(&self, from: &str, to: &str) -> HostResult<()>;

    fn set_mod_enabled(&self, collection: Uuid, dir_name: &str, enabled: bool) -> HostResult<()>;

    fn mod_settings(&self, collection: Uuid, dir_name: &str) -> HostResult<Option<ModSettings>>;

    fn list_mods(&self) -> HostResult<Vec<HostMod>>;
}
