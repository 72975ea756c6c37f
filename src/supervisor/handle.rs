//! Cloneable handle to the supervisor control task.

use std::path::PathBuf;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use super::runner::{Command, Control};
use super::{LogEntry, LogKind, ProcessId, ProcessInfoUpdate, ServerInfo};
use crate::bus::EventBus;
use crate::config::RunnerConfig;
use crate::process::SpawnError;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The command could not be turned into a process.
    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] SpawnError),
    /// The control task has shut down.
    #[error("Supervisor control task is not running")]
    ControlTaskGone,
}

/// Launches, tracks and controls child processes.
///
/// Every method sends a request to the control task and waits for its reply.
/// Control failures (unknown id, nothing running) are reported as `false`,
/// `None` or an empty list rather than as errors.
#[derive(Debug, Clone)]
pub struct Supervisor {
    commands: UnboundedSender<Command>,
    bus: EventBus,
}

impl Supervisor {
    /// Spawn the control task on the current tokio runtime.
    ///
    /// The task subscribes to the remote-control topics on `bus` and runs
    /// until [`shutdown`](Self::shutdown) is called or every handle is
    /// dropped. Either way, live processes are terminated.
    #[must_use]
    pub fn spawn(bus: EventBus, config: RunnerConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (runs, run_rx) = mpsc::unbounded_channel();

        let control = Control::new(bus.clone(), config, commands.downgrade(), runs);
        tokio::spawn(control.run(command_rx, run_rx));

        Self { commands, bus }
    }

    /// The bus this supervisor publishes on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SupervisorError::ControlTaskGone)?;
        rx.await.map_err(|_| SupervisorError::ControlTaskGone)
    }

    /// Start `command` in `cwd` and return its id.
    ///
    /// A command that fails to spawn still gets a record in `error` status,
    /// an error log entry and an error event, and its id is returned.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Spawn` if the command is empty, or
    /// `SupervisorError::ControlTaskGone` after shutdown.
    pub async fn start(
        &self,
        command: impl Into<String>,
        cwd: Option<PathBuf>,
    ) -> Result<ProcessId, SupervisorError> {
        let command = command.into();
        let id = self
            .request(|reply| Command::Start {
                command,
                cwd,
                reply,
            })
            .await??;
        Ok(id)
    }

    /// Request termination of a running process.
    pub async fn stop(&self, id: ProcessId) -> bool {
        self.request(|reply| Command::Stop { id, reply })
            .await
            .unwrap_or_default()
    }

    /// Terminate and respawn a process under the same id, optionally with a
    /// new command.
    pub async fn restart(&self, id: ProcessId, new_command: Option<String>) -> bool {
        self.request(|reply| Command::Restart {
            id,
            new_command,
            reply,
        })
        .await
        .unwrap_or_default()
    }

    pub async fn update_process_info(&self, id: ProcessId, update: ProcessInfoUpdate) -> bool {
        self.request(|reply| Command::UpdateInfo { id, update, reply })
            .await
            .unwrap_or_default()
    }

    pub async fn get_server_info(&self, id: ProcessId) -> Option<ServerInfo> {
        self.request(|reply| Command::GetInfo { id, reply })
            .await
            .ok()
            .flatten()
    }

    /// Every tracked process, oldest first.
    pub async fn get_all_processes(&self) -> Vec<(ProcessId, ServerInfo)> {
        self.request(|reply| Command::GetAll { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn is_running(&self, id: ProcessId) -> bool {
        self.get_server_info(id)
            .await
            .is_some_and(|info| info.status.is_running())
    }

    /// Stop every tracked process concurrently. Returns how many stops
    /// succeeded.
    pub async fn stop_all(&self) -> usize {
        let processes = self.get_all_processes().await;
        let results =
            futures_util::future::join_all(processes.into_iter().map(|(id, _)| self.stop(id)))
                .await;
        results.into_iter().filter(|stopped| *stopped).count()
    }

    /// Append an entry to a process's log buffer.
    pub async fn add_log(&self, id: ProcessId, kind: LogKind, content: impl Into<String>) -> bool {
        let content = content.into();
        self.request(|reply| Command::AddLog {
            id,
            kind,
            content,
            reply,
        })
        .await
        .unwrap_or_default()
    }

    /// Buffered log entries, oldest first. Empty for an unknown id.
    pub async fn get_process_logs(&self, id: ProcessId) -> Vec<LogEntry> {
        self.request(|reply| Command::GetLogs { id, reply })
            .await
            .unwrap_or_default()
    }

    /// Empty a process's log buffer, leaving a single "logs cleared" entry.
    pub async fn clear_process_logs(&self, id: ProcessId) -> bool {
        self.request(|reply| Command::ClearLogs { id, reply })
            .await
            .unwrap_or_default()
    }

    /// Terminate every process and stop the control task. Returns how many
    /// processes were still running.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::ControlTaskGone` if the task already exited.
    pub async fn shutdown(&self) -> Result<usize, SupervisorError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
