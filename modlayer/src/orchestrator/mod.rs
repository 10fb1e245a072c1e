//! Materialization orchestration.
//!
//! [`Engine`] spawns runs that take a package version from catalog metadata
//! to a registered mod directory, and completes imports of unmanaged
//! directories. [`TaskStatus`] exposes each run's state and progress.

mod engine;
mod state;
mod types;

pub use engine::{Engine, TaskHandle, TaskResult};
pub use state::{TaskState, TaskStatus};
pub use types::{MaterializationOutcome, MaterializationRequest, PendingImport};
