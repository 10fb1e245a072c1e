//! Materialization state machine and observable status.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::EngineError;
use crate::progress::Progress;

/// States of one materialization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    NotStarted,
    /// Asking the catalog for the version's file graph.
    ResolvingMetadata,
    /// Verifying and downloading content files.
    FetchingFiles,
    /// Writing host descriptors and the sidecar.
    BuildingManifest,
    /// Telling the host about the directory.
    RegisteringWithHost,
    Finished,
    Errored,
    Cancelled,
}

impl TaskState {
    /// Get a human-readable name for the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ResolvingMetadata => "Resolving metadata",
            Self::FetchingFiles => "Fetching files",
            Self::BuildingManifest => "Building manifest",
            Self::RegisteringWithHost => "Registering with host",
            Self::Finished => "Finished",
            Self::Errored => "Errored",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No transition ever leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
struct StatusInner {
    state: TaskState,
    /// Progress captured on entering a terminal state.
    frozen: Option<(u32, u32)>,
    error: Option<Arc<EngineError>>,
    warnings: Vec<String>,
}

/// Shared, observable status of a run.
///
/// Workers advance [`progress`](Self::progress) directly; observers read
/// [`snapshot`](Self::snapshot), which stops moving once the run is over.
#[derive(Debug)]
pub struct TaskStatus {
    inner: RwLock<StatusInner>,
    progress: Arc<Progress>,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatus {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StatusInner {
                state: TaskState::NotStarted,
                frozen: None,
                error: None,
                warnings: Vec::new(),
            }),
            progress: Arc::new(Progress::new()),
        }
    }

    pub fn state(&self) -> TaskState {
        self.inner.read().state
    }

    /// Counter for the current state's work.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// `(current, max)` of the current state, or of the last state before
    /// the run ended.
    pub fn snapshot(&self) -> (u32, u32) {
        match self.inner.read().frozen {
            Some(frozen) => frozen,
            None => self.progress.snapshot(),
        }
    }

    /// Error that ended the run, if it errored.
    pub fn error(&self) -> Option<Arc<EngineError>> {
        self.inner.read().error.clone()
    }

    /// Soft failures collected along the way.
    pub fn warnings(&self) -> Vec<String> {
        self.inner.read().warnings.clone()
    }

    pub fn warn(&self, warning: impl Into<String>) {
        self.inner.write().warnings.push(warning.into());
    }

    /// Move to a working state with `max` units of work.
    ///
    /// Returns false, changing nothing, once the run has ended.
    pub fn enter(&self, state: TaskState, max: u32) -> bool {
        debug_assert!(!state.is_terminal());
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        tracing::info!(from = %inner.state, to = %state, max, "Task state changed");
        inner.state = state;
        self.progress.reset(max);
        true
    }

    pub fn finish(&self) -> bool {
        self.terminate(TaskState::Finished, None)
    }

    pub fn fail(&self, error: Arc<EngineError>) -> bool {
        self.terminate(TaskState::Errored, Some(error))
    }

    pub fn cancel(&self) -> bool {
        self.terminate(TaskState::Cancelled, None)
    }

    fn terminate(&self, state: TaskState, error: Option<Arc<EngineError>>) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        let frozen = self.progress.snapshot();
        match &error {
            Some(e) => tracing::error!(from = %inner.state, error = %e, "Task errored"),
            None => tracing::info!(from = %inner.state, to = %state, "Task ended"),
        }
        inner.state = state;
        inner.frozen = Some(frozen);
        inner.error = error;
        true
    }
}
