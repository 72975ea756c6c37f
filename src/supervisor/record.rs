//! Process records and the snapshots handed to consumers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LogBuffer, ProcessStatus};

/// Opaque identifier of a supervised process, stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProcessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Partial update of a record's display and URL fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfoUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ProcessInfoUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.server_url.is_none() && self.host.is_none() && self.port.is_none()
    }
}

/// Point-in-time copy of a process record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ProcessId,
    pub name: String,
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    /// Seconds since `start_time`, computed when the snapshot was taken.
    pub uptime_secs: u64,
    pub server_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub exit_code: Option<i32>,
    pub restart_count: u32,
}

/// The supervisor's in-memory state for one spawned command.
#[derive(Debug)]
pub struct ProcessRecord {
    pub(crate) id: ProcessId,
    pub(crate) name: String,
    pub(crate) command: String,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) status: ProcessStatus,
    pub(crate) pid: Option<u32>,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) server_url: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) restart_count: u32,
    /// Spawn counter; messages tagged with an older value are stale.
    pub(crate) generation: u64,
    pub(crate) logs: LogBuffer,
}

impl ProcessRecord {
    pub(crate) fn new(
        id: ProcessId,
        name: String,
        command: String,
        cwd: Option<PathBuf>,
        log_capacity: usize,
    ) -> Self {
        Self {
            id,
            name,
            command,
            cwd,
            status: ProcessStatus::Starting,
            pid: None,
            start_time: Utc::now(),
            server_url: None,
            host: None,
            port: None,
            exit_code: None,
            restart_count: 0,
            generation: 0,
            logs: LogBuffer::new(log_capacity),
        }
    }

    pub(crate) fn transition(&mut self, next: ProcessStatus) {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                process_id = %self.id,
                from = %self.status,
                to = %next,
                "Unexpected status transition"
            );
        }
        tracing::debug!(process_id = %self.id, from = %self.status, to = %next, "Status transition");
        self.status = next;
    }

    /// Forget everything learned about the previous run.
    pub(crate) fn reset_run(&mut self) {
        self.pid = None;
        self.server_url = None;
        self.host = None;
        self.port = None;
        self.exit_code = None;
    }

    pub(crate) fn apply(&mut self, update: &ProcessInfoUpdate) {
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(url) = &update.server_url {
            self.server_url = Some(url.clone());
        }
        if let Some(host) = &update.host {
            self.host = Some(host.clone());
        }
        if let Some(port) = update.port {
            self.port = Some(port);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ServerInfo {
        let uptime = Utc::now().signed_duration_since(self.start_time);
        ServerInfo {
            id: self.id,
            name: self.name.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            status: self.status,
            pid: self.pid,
            start_time: self.start_time,
            uptime_secs: u64::try_from(uptime.num_seconds()).unwrap_or(0),
            server_url: self.server_url.clone(),
            host: self.host.clone(),
            port: self.port,
            exit_code: self.exit_code,
            restart_count: self.restart_count,
        }
    }
}
