//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::GuardOptions;
use crate::supervisor::DEFAULT_LOG_CAPACITY;

/// Configuration for the process supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Log entries kept per process.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// How long an exited process stays inspectable before it is purged.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
    /// Purge exited processes after the grace window.
    #[serde(default = "default_true")]
    pub purge_exited: bool,
    /// Delay between SIGTERM and SIGKILL.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// Longest wait for stream readers after a process exits.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Also look for server URLs on stderr.
    #[serde(default)]
    pub scan_stderr_for_urls: bool,
    /// Working directory used when `start` is given none.
    #[serde(default)]
    pub default_cwd: Option<PathBuf>,
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_exit_grace_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_terminate_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            exit_grace_ms: default_exit_grace_ms(),
            purge_exited: true,
            terminate_timeout_ms: default_terminate_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            scan_stderr_for_urls: false,
            default_cwd: None,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    #[must_use]
    pub fn guard_options(&self) -> GuardOptions {
        GuardOptions {
            terminate_timeout: Duration::from_millis(self.terminate_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}
