//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::RetryPolicy;

/// Default catalog endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://api.modlayer.app/graphql";

/// What to do when a selection names a group the catalog does not have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownGroupPolicy {
    /// Drop the group silently.
    Ignore,
    /// Drop the group, log it and report it in the run outcome.
    #[default]
    Warn,
    /// Fail metadata resolution.
    Reject,
}

/// Number of CPUs, falling back to 4.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Configuration for the materialization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Use this mod root instead of asking the host.
    pub mod_root_override: Option<PathBuf>,

    /// Aggregate download cap across all transfers. 0 means unlimited.
    pub max_bytes_per_second: u64,

    /// Concurrent blob transfers per run.
    pub download_concurrency: usize,

    /// Concurrent file hashes (verification and import).
    pub hash_concurrency: usize,

    /// Transport connect/read timeout.
    pub request_timeout: Duration,

    pub retry_policy: RetryPolicy,

    /// Prefix for host display names.
    pub title_prefix: String,

    /// Host folder fresh installs are placed in. Empty leaves placement to
    /// the host.
    pub host_folder: String,

    /// Omit the variant name from display names of default variants.
    pub hide_default_variant: bool,

    /// Rename the host sort name along with the directory.
    pub replace_sort_name: bool,

    pub unknown_group_policy: UnknownGroupPolicy,

    pub catalog_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mod_root_override: None,
            max_bytes_per_second: 0,
            download_concurrency: default_parallelism(),
            hash_concurrency: default_parallelism(),
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            title_prefix: "[ML] ".to_string(),
            host_folder: "modlayer".to_string(),
            hide_default_variant: true,
            replace_sort_name: true,
            unknown_group_policy: UnknownGroupPolicy::default(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mod_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mod_root_override = Some(root.into());
        self
    }

    pub fn with_max_bytes_per_second(mut self, rate: u64) -> Self {
        self.max_bytes_per_second = rate;
        self
    }

    pub fn with_download_concurrency(mut self, n: usize) -> Self {
        self.download_concurrency = n.max(1);
        self
    }

    pub fn with_hash_concurrency(mut self, n: usize) -> Self {
        self.hash_concurrency = n.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = prefix.into();
        self
    }

    pub fn with_host_folder(mut self, folder: impl Into<String>) -> Self {
        self.host_folder = folder.into();
        self
    }

    pub fn with_hide_default_variant(mut self, hide: bool) -> Self {
        self.hide_default_variant = hide;
        self
    }

    pub fn with_replace_sort_name(mut self, replace: bool) -> Self {
        self.replace_sort_name = replace;
        self
    }

    pub fn with_unknown_group_policy(mut self, policy: UnknownGroupPolicy) -> Self {
        self.unknown_group_policy = policy;
        self
    }

    pub fn with_catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into();
        self
    }
}
