//! Event types carried by the bus.
//!
//! Every event belongs to exactly one [`Topic`]. Topic names live in the
//! `runner:` namespace so prefix subscriptions such as `"runner:*"` see the
//! whole control plane.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::process::StreamKind;
use crate::supervisor::{LogEntry, ProcessId, ProcessInfoUpdate, ServerInfo};

/// Namespace shared by every topic name.
pub const TOPIC_NAMESPACE: &str = "runner:";

/// A named channel on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Started,
    Stopped,
    Output,
    Error,
    Status,
    Restarted,
    InfoUpdated,
    /// Inbound: ask the supervisor to republish status.
    RequestStatus,
    /// Inbound: ask the supervisor to restart a process.
    RequestRestart,
    /// Inbound: ask the supervisor to clear a process's logs.
    ClearLogs,
}

impl Topic {
    /// All topics, outbound first.
    pub const ALL: [Topic; 10] = [
        Topic::Started,
        Topic::Stopped,
        Topic::Output,
        Topic::Error,
        Topic::Status,
        Topic::Restarted,
        Topic::InfoUpdated,
        Topic::RequestStatus,
        Topic::RequestRestart,
        Topic::ClearLogs,
    ];

    /// Fully qualified topic name, e.g. `runner:started`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "runner:started",
            Self::Stopped => "runner:stopped",
            Self::Output => "runner:output",
            Self::Error => "runner:error",
            Self::Status => "runner:status",
            Self::Restarted => "runner:restarted",
            Self::InfoUpdated => "runner:info-updated",
            Self::RequestStatus => "runner:get-status",
            Self::RequestRestart => "runner:restart",
            Self::ClearLogs => "runner:clear-logs",
        }
    }

    /// Returns true for the remote-control topics the supervisor consumes.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::RequestStatus | Self::RequestRestart | Self::ClearLogs
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown topic name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

/// Why a run of a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own.
    Exited,
    /// Termination was requested through `stop`.
    Stopped,
    /// Termination was requested through `restart`.
    Restarted,
}

/// One chunk of process output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub process_id: ProcessId,
    pub stream: StreamKind,
    pub chunk: String,
    pub command: String,
    pub cwd: Option<PathBuf>,
}

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// A process reached `active`, or its detected URL changed.
    Started { process: ServerInfo },
    /// A run of a process ended.
    Stopped {
        process_id: ProcessId,
        exit_code: Option<i32>,
        reason: ExitReason,
        process: ServerInfo,
    },
    /// A chunk of stdout or stderr.
    Output(OutputChunk),
    /// A failure turned into data.
    Error {
        process_id: Option<ProcessId>,
        message: String,
    },
    /// Current state of a process, optionally with its log snapshot.
    Status {
        process: ServerInfo,
        logs: Option<Vec<LogEntry>>,
    },
    Restarted {
        process_id: ProcessId,
        old_command: String,
        new_command: String,
        process: ServerInfo,
    },
    InfoUpdated {
        process_id: ProcessId,
        changes: ProcessInfoUpdate,
        process: ServerInfo,
    },
    RequestStatus { process_id: Option<ProcessId> },
    RequestRestart {
        process_id: ProcessId,
        new_command: Option<String>,
    },
    ClearLogs { process_id: ProcessId },
}

impl Event {
    /// The topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Started { .. } => Topic::Started,
            Self::Stopped { .. } => Topic::Stopped,
            Self::Output(_) => Topic::Output,
            Self::Error { .. } => Topic::Error,
            Self::Status { .. } => Topic::Status,
            Self::Restarted { .. } => Topic::Restarted,
            Self::InfoUpdated { .. } => Topic::InfoUpdated,
            Self::RequestStatus { .. } => Topic::RequestStatus,
            Self::RequestRestart { .. } => Topic::RequestRestart,
            Self::ClearLogs { .. } => Topic::ClearLogs,
        }
    }

    /// The process this event concerns, if any.
    #[must_use]
    pub fn process_id(&self) -> Option<ProcessId> {
        match self {
            Self::Started { process } | Self::Status { process, .. } => Some(process.id),
            Self::Output(output) => Some(output.process_id),
            Self::Stopped { process_id, .. }
            | Self::Restarted { process_id, .. }
            | Self::InfoUpdated { process_id, .. }
            | Self::RequestRestart { process_id, .. }
            | Self::ClearLogs { process_id } => Some(*process_id),
            Self::Error { process_id, .. } | Self::RequestStatus { process_id } => *process_id,
        }
    }

    /// Build an error event.
    #[must_use]
    pub fn error(process_id: Option<ProcessId>, message: impl Into<String>) -> Self {
        Self::Error {
            process_id,
            message: message.into(),
        }
    }
}
