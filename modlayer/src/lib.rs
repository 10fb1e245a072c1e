//! ModLayer - content-addressed mod materialization
//!
//! This library downloads versioned, option-configurable mod packages into
//! per-mod content stores and keeps their on-disk layout, host descriptors
//! and host registration in step with what the catalog says a version
//! contains.
//!
//! # Overview
//!
//! - [`catalog`]: the package catalog interface and its GraphQL client
//! - [`content`]: the `files/<hash>.<ext>` store and filesystem helpers
//! - [`fetch`]: rate-limited, retried, zstd-decoded blob transfers
//! - [`resolver`]: mod directory naming, placement and migration
//! - [`manifest`]: host descriptor files built from the resolved selection
//! - [`host`]: the mod-manager host interface and registration sequence
//! - [`import`]: adoption of unmanaged directories
//! - [`orchestrator`]: the [`Engine`] running the whole state machine

pub mod catalog;
pub mod config;
pub mod content;
pub mod error;
pub mod fetch;
pub mod host;
pub mod import;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod package;
pub mod progress;
pub mod resolver;

pub use config::{EngineConfig, UnknownGroupPolicy};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{
    Engine, MaterializationOutcome, MaterializationRequest, PendingImport, TaskHandle, TaskResult,
    TaskState, TaskStatus,
};
pub use package::{InstallScope, OptionSelection, PackageIdentity};
pub use progress::Progress;
