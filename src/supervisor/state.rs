//! Process lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Starting,
    Active,
    Stopped,
    Error,
}

impl ProcessStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Starting` is reachable from every state (restart); the others only
    /// follow `Starting` or `Active`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Starting => true,
            Self::Active => self == Self::Starting,
            Self::Stopped | Self::Error => matches!(self, Self::Starting | Self::Active),
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
