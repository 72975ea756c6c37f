//! Supervisor control task.
//!
//! One task owns every [`ProcessRecord`] and processes two mailboxes: API
//! commands from [`Supervisor`](super::Supervisor) handles and run messages
//! from stream readers and process waiters. Nothing else touches the
//! registry, so no locks are needed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;

use super::{
    LogEntry, LogKind, ProcessId, ProcessInfoUpdate, ProcessRecord, ProcessStatus, ServerInfo,
    LOGS_CLEARED,
};
use crate::bus::{Event, EventBus, ExitReason, OutputChunk, SubscriptionId, Topic};
use crate::config::RunnerConfig;
use crate::process::{
    display_name, CommandLine, ManagedProcess, ProcessBuilder, ProcessGuard, RunEvent, RunMessage,
    RunTag, SpawnError, StreamKind,
};
use crate::sniffer::{DetectedUrl, UrlDetector, UrlSniffer};

/// Requests handled by the control task.
#[derive(Debug)]
pub(crate) enum Command {
    Start {
        command: String,
        cwd: Option<PathBuf>,
        reply: oneshot::Sender<Result<ProcessId, SpawnError>>,
    },
    Stop {
        id: ProcessId,
        reply: oneshot::Sender<bool>,
    },
    Restart {
        id: ProcessId,
        new_command: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    UpdateInfo {
        id: ProcessId,
        update: ProcessInfoUpdate,
        reply: oneshot::Sender<bool>,
    },
    GetInfo {
        id: ProcessId,
        reply: oneshot::Sender<Option<ServerInfo>>,
    },
    GetAll {
        reply: oneshot::Sender<Vec<(ProcessId, ServerInfo)>>,
    },
    AddLog {
        id: ProcessId,
        kind: LogKind,
        content: String,
        reply: oneshot::Sender<bool>,
    },
    GetLogs {
        id: ProcessId,
        reply: oneshot::Sender<Vec<LogEntry>>,
    },
    ClearLogs {
        id: ProcessId,
        reply: oneshot::Sender<bool>,
    },
    /// A detector attached to `generation` of `id` found a server URL.
    UrlDetected {
        id: ProcessId,
        generation: u64,
        detected: DetectedUrl,
    },
    /// Inbound remote-control requests from the bus.
    RemoteStatus {
        id: Option<ProcessId>,
    },
    RemoteRestart {
        id: ProcessId,
        new_command: Option<String>,
    },
    RemoteClearLogs {
        id: ProcessId,
    },
    /// The exit grace window of `generation` of `id` has elapsed.
    Purge {
        id: ProcessId,
        generation: u64,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Registry slot for one process.
struct Entry {
    record: ProcessRecord,
    guard: Option<ProcessGuard>,
    detector: Option<UrlDetector>,
}

impl Entry {
    fn detach_detector(&mut self) {
        if let Some(detector) = self.detector.take() {
            detector.detach();
        }
    }
}

/// State owned by the control task.
pub(crate) struct Control {
    bus: EventBus,
    config: RunnerConfig,
    sniffer: Arc<UrlSniffer>,
    processes: HashMap<ProcessId, Entry>,
    /// Weak so that dropping every handle closes the mailbox.
    commands: WeakUnboundedSender<Command>,
    runs: UnboundedSender<RunMessage>,
    remote: Vec<(Topic, SubscriptionId)>,
    next_log_id: u64,
}

impl Control {
    pub(crate) fn new(
        bus: EventBus,
        config: RunnerConfig,
        commands: WeakUnboundedSender<Command>,
        runs: UnboundedSender<RunMessage>,
    ) -> Self {
        let remote = super::control::subscribe(&bus, commands.clone());
        Self {
            bus,
            config,
            sniffer: Arc::new(UrlSniffer::new()),
            processes: HashMap::new(),
            commands,
            runs,
            remote,
            next_log_id: 0,
        }
    }

    /// Process both mailboxes until shutdown or until every handle is gone.
    pub(crate) async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut runs: UnboundedReceiver<RunMessage>,
    ) {
        tracing::debug!("Supervisor control task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let stopped = self.shutdown().await;
                        let _ = reply.send(stopped);
                        break;
                    }
                    Some(command) => self.handle_command(command, &mut runs).await,
                    None => {
                        tracing::debug!("All supervisor handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = runs.recv() => self.handle_run(message),
            }
        }

        for (topic, id) in self.remote.drain(..) {
            self.bus.unsubscribe(topic, id);
        }
        tracing::debug!("Supervisor control task finished");
    }

    async fn handle_command(
        &mut self,
        command: Command,
        runs: &mut UnboundedReceiver<RunMessage>,
    ) {
        match command {
            Command::Start {
                command,
                cwd,
                reply,
            } => {
                let _ = reply.send(self.start(command, cwd));
            }
            Command::Stop { id, reply } => {
                let _ = reply.send(self.stop(id));
            }
            Command::Restart {
                id,
                new_command,
                reply,
            } => {
                let restarted = self.restart(id, new_command, runs).await;
                let _ = reply.send(restarted);
            }
            Command::UpdateInfo { id, update, reply } => {
                let _ = reply.send(self.update_info(id, update));
            }
            Command::GetInfo { id, reply } => {
                let info = self.processes.get(&id).map(|e| e.record.snapshot());
                let _ = reply.send(info);
            }
            Command::GetAll { reply } => {
                let _ = reply.send(self.all_processes());
            }
            Command::AddLog {
                id,
                kind,
                content,
                reply,
            } => {
                let _ = reply.send(self.add_log(id, kind, content));
            }
            Command::GetLogs { id, reply } => {
                let logs = self
                    .processes
                    .get(&id)
                    .map(|e| e.record.logs.snapshot())
                    .unwrap_or_default();
                let _ = reply.send(logs);
            }
            Command::ClearLogs { id, reply } => {
                let _ = reply.send(self.clear_logs(id));
            }
            Command::UrlDetected {
                id,
                generation,
                detected,
            } => self.url_detected(id, generation, detected),
            Command::RemoteStatus { id } => self.publish_requested_status(id),
            Command::RemoteRestart { id, new_command } => {
                if !self.restart(id, new_command, runs).await {
                    self.emit(Event::error(
                        Some(id),
                        format!("Failed to restart process {id}"),
                    ));
                }
            }
            Command::RemoteClearLogs { id } => {
                if !self.clear_logs(id) {
                    tracing::debug!(process_id = %id, "Clear logs requested for unknown process");
                }
            }
            Command::Purge { id, generation } => self.purge(id, generation),
            // Intercepted by `run`.
            Command::Shutdown { reply } => {
                let _ = reply.send(0);
            }
        }
    }

    /// Publish an event. An unhandled error event is logged and dropped.
    fn emit(&self, event: Event) {
        if let Err(e) = self.bus.publish(event) {
            tracing::error!(error = %e, "Error event had no subscribers");
        }
    }

    fn emit_status(&self, id: ProcessId, with_logs: bool) {
        if let Some(entry) = self.processes.get(&id) {
            let logs = with_logs.then(|| entry.record.logs.snapshot());
            self.emit(Event::Status {
                process: entry.record.snapshot(),
                logs,
            });
        }
    }

    fn push_log(&mut self, id: ProcessId, kind: LogKind, content: String) -> bool {
        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };
        self.next_log_id += 1;
        entry.record.logs.push(LogEntry {
            id: self.next_log_id,
            timestamp: Utc::now(),
            kind,
            content,
            process_id: id,
        });
        true
    }

    /// Record a failure as an error log entry and an error event.
    fn report_failure(&mut self, id: ProcessId, message: String) {
        self.push_log(id, LogKind::Error, message.clone());
        self.emit(Event::error(Some(id), message));
    }

    /// Spawn one run of a process and wire its readers and URL detector.
    fn launch(
        &self,
        id: ProcessId,
        generation: u64,
        command: &CommandLine,
        cwd: Option<&PathBuf>,
    ) -> Result<(ProcessGuard, UrlDetector), SpawnError> {
        let mut builder = ProcessBuilder::new(command.clone());
        if let Some(dir) = cwd {
            builder = builder.working_dir(dir);
        }
        let process = ManagedProcess::spawn(&builder)?;

        let tag = RunTag {
            process_id: id,
            generation,
        };
        let guard = ProcessGuard::launch(
            process,
            tag,
            self.runs.clone(),
            self.config.guard_options(),
        );

        let commands = self.commands.clone();
        let detector = UrlDetector::attach(
            &self.bus,
            Arc::clone(&self.sniffer),
            id,
            self.config.scan_stderr_for_urls,
            move |detected| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::UrlDetected {
                        id,
                        generation,
                        detected,
                    });
                }
            },
        );

        Ok((guard, detector))
    }

    fn start(&mut self, command: String, cwd: Option<PathBuf>) -> Result<ProcessId, SpawnError> {
        let line = CommandLine::parse(&command)?;
        let id = ProcessId::new();
        let cwd = cwd.or_else(|| self.config.default_cwd.clone());

        let mut record = ProcessRecord::new(
            id,
            display_name(&command),
            command,
            cwd.clone(),
            self.config.log_capacity,
        );
        record.generation = 1;
        self.processes.insert(
            id,
            Entry {
                record,
                guard: None,
                detector: None,
            },
        );
        self.emit_status(id, false);

        match self.launch(id, 1, &line, cwd.as_ref()) {
            Ok((guard, detector)) => {
                let pid = guard.pid();
                if let Some(entry) = self.processes.get_mut(&id) {
                    entry.record.pid = pid;
                    entry.record.transition(ProcessStatus::Active);
                    entry.guard = Some(guard);
                    entry.detector = Some(detector);
                    tracing::info!(
                        process_id = %id,
                        ?pid,
                        command = %entry.record.command,
                        "Process started"
                    );
                    let process = entry.record.snapshot();
                    self.emit(Event::Started { process });
                }
            }
            Err(e) => {
                tracing::warn!(process_id = %id, error = %e, "Failed to start process");
                if let Some(entry) = self.processes.get_mut(&id) {
                    entry.record.transition(ProcessStatus::Error);
                }
                self.report_failure(id, format!("Failed to start process: {e}"));
                self.schedule_purge(id, 1);
            }
        }

        Ok(id)
    }

    fn stop(&mut self, id: ProcessId) -> bool {
        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };
        if entry.record.status == ProcessStatus::Stopped {
            return false;
        }
        let Some(guard) = entry.guard.as_mut() else {
            return false;
        };

        if !guard.request_termination() {
            entry.guard = None;
            tracing::warn!(process_id = %id, "Termination could not be delivered");
            self.report_failure(
                id,
                format!("Failed to stop process {id}: process already exited"),
            );
            return false;
        }

        entry.record.transition(ProcessStatus::Stopped);
        tracing::info!(process_id = %id, pid = ?entry.record.pid, "Stopping process");
        self.emit_status(id, true);
        true
    }

    async fn restart(
        &mut self,
        id: ProcessId,
        new_command: Option<String>,
        runs: &mut UnboundedReceiver<RunMessage>,
    ) -> bool {
        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };

        let old_command = entry.record.command.clone();
        let command = new_command.unwrap_or_else(|| old_command.clone());
        // A run that already ended has published its own stop event.
        let finished = entry.guard.is_none() && entry.record.status.is_terminal();
        let exit_code = match entry.guard.take() {
            Some(guard) => guard.terminate().await,
            None => entry.record.exit_code,
        };

        // The old run's remaining output is queued; log it before the
        // generation moves on.
        self.drain_run(id, runs);

        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };
        entry.detach_detector();
        if !entry.record.status.is_terminal() {
            entry.record.transition(ProcessStatus::Stopped);
        }
        entry.record.exit_code = exit_code;
        let stopped = Event::Stopped {
            process_id: id,
            exit_code,
            reason: ExitReason::Restarted,
            process: entry.record.snapshot(),
        };

        entry.record.reset_run();
        entry.record.generation += 1;
        entry.record.restart_count += 1;
        entry.record.start_time = Utc::now();
        entry.record.transition(ProcessStatus::Starting);
        let generation = entry.record.generation;
        let cwd = entry.record.cwd.clone();
        if !finished {
            self.emit(stopped);
        }

        tracing::info!(process_id = %id, %old_command, new_command = %command, "Restarting process");
        let launched = CommandLine::parse(&command)
            .and_then(|line| self.launch(id, generation, &line, cwd.as_ref()));

        match launched {
            Ok((guard, detector)) => {
                let Some(entry) = self.processes.get_mut(&id) else {
                    return false;
                };
                if command != entry.record.command {
                    entry.record.name = display_name(&command);
                    entry.record.command.clone_from(&command);
                }
                entry.record.pid = guard.pid();
                entry.record.transition(ProcessStatus::Active);
                entry.guard = Some(guard);
                entry.detector = Some(detector);
                let process = entry.record.snapshot();
                self.emit(Event::Restarted {
                    process_id: id,
                    old_command,
                    new_command: command,
                    process,
                });
                true
            }
            Err(e) => {
                tracing::warn!(process_id = %id, error = %e, "Failed to restart process");
                if let Some(entry) = self.processes.get_mut(&id) {
                    entry.record.transition(ProcessStatus::Error);
                }
                self.report_failure(id, format!("Failed to restart process: {e}"));
                self.schedule_purge(id, generation);
                false
            }
        }
    }

    /// Handle run messages already queued, dropping the exit report of `id`.
    fn drain_run(&mut self, id: ProcessId, runs: &mut UnboundedReceiver<RunMessage>) {
        while let Ok(message) = runs.try_recv() {
            if message.tag.process_id == id && matches!(message.event, RunEvent::Exited { .. }) {
                continue;
            }
            self.handle_run(message);
        }
    }

    fn update_info(&mut self, id: ProcessId, update: ProcessInfoUpdate) -> bool {
        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };
        entry.record.apply(&update);
        tracing::debug!(process_id = %id, ?update, "Process info updated");
        let process = entry.record.snapshot();
        self.emit(Event::InfoUpdated {
            process_id: id,
            changes: update,
            process,
        });
        true
    }

    fn all_processes(&self) -> Vec<(ProcessId, ServerInfo)> {
        let mut all: Vec<_> = self
            .processes
            .iter()
            .map(|(id, entry)| (*id, entry.record.snapshot()))
            .collect();
        all.sort_by_key(|(_, info)| info.start_time);
        all
    }

    fn add_log(&mut self, id: ProcessId, kind: LogKind, content: String) -> bool {
        self.push_log(id, kind, content)
    }

    fn clear_logs(&mut self, id: ProcessId) -> bool {
        let Some(entry) = self.processes.get_mut(&id) else {
            return false;
        };
        entry.record.logs.clear();
        self.push_log(id, LogKind::System, LOGS_CLEARED.to_string());
        self.emit_status(id, true);
        true
    }

    fn publish_requested_status(&self, id: Option<ProcessId>) {
        match id {
            Some(id) if self.processes.contains_key(&id) => self.emit_status(id, true),
            Some(id) => {
                tracing::debug!(process_id = %id, "Status requested for unknown process");
            }
            None => {
                for (id, _) in self.all_processes() {
                    self.emit_status(id, true);
                }
            }
        }
    }

    fn url_detected(&mut self, id: ProcessId, generation: u64, detected: DetectedUrl) {
        let Some(entry) = self.processes.get_mut(&id) else {
            return;
        };
        // Detections queued behind the exit of their run are stale.
        if entry.record.generation != generation || entry.record.status.is_terminal() {
            tracing::trace!(process_id = %id, url = %detected.url, "Dropping late URL detection");
            return;
        }
        entry.record.apply(&ProcessInfoUpdate {
            server_url: Some(detected.url),
            host: Some(detected.host),
            port: Some(detected.port),
            ..Default::default()
        });
        let process = entry.record.snapshot();
        self.emit(Event::Started { process });
        self.emit_status(id, false);
    }

    fn handle_run(&mut self, message: RunMessage) {
        let RunMessage { tag, event } = message;
        let id = tag.process_id;
        let Some(entry) = self.processes.get(&id) else {
            return;
        };
        if entry.record.generation != tag.generation {
            tracing::trace!(process_id = %id, generation = tag.generation, "Dropping stale run message");
            return;
        }

        match event {
            RunEvent::Output { stream, chunk } => self.output(id, stream, chunk),
            RunEvent::StreamFailed { stream, error } => {
                self.report_failure(id, format!("Failed to read {stream}: {error}"));
            }
            RunEvent::Exited {
                exit_code,
                requested,
            } => self.exited(id, exit_code, requested),
        }
    }

    fn output(&mut self, id: ProcessId, stream: StreamKind, chunk: String) {
        self.push_log(id, LogKind::from(stream), chunk.clone());
        let Some(entry) = self.processes.get(&id) else {
            return;
        };
        self.emit(Event::Output(OutputChunk {
            process_id: id,
            stream,
            chunk,
            command: entry.record.command.clone(),
            cwd: entry.record.cwd.clone(),
        }));
    }

    fn exited(&mut self, id: ProcessId, exit_code: Option<i32>, requested: bool) {
        let Some(entry) = self.processes.get_mut(&id) else {
            return;
        };
        entry.guard = None;
        entry.record.exit_code = exit_code;

        // A child may exit on its own after `stop` marked it stopped.
        let requested = requested || entry.record.status == ProcessStatus::Stopped;
        let clean = requested || exit_code == Some(0);
        let next = if clean {
            ProcessStatus::Stopped
        } else {
            ProcessStatus::Error
        };
        if entry.record.status != next {
            entry.record.transition(next);
        }
        tracing::info!(process_id = %id, ?exit_code, requested, "Process exited");

        let generation = entry.record.generation;
        let stopped = Event::Stopped {
            process_id: id,
            exit_code,
            reason: if requested {
                ExitReason::Stopped
            } else {
                ExitReason::Exited
            },
            process: entry.record.snapshot(),
        };

        if !clean {
            let message = match exit_code {
                Some(code) => format!("Process exited with code {code}"),
                None => "Process terminated by signal".to_string(),
            };
            self.push_log(id, LogKind::Error, message);
        }
        self.emit(stopped);

        if let Some(entry) = self.processes.get_mut(&id) {
            entry.detach_detector();
        }
        self.schedule_purge(id, generation);
    }

    fn schedule_purge(&self, id: ProcessId, generation: u64) {
        if !self.config.purge_exited {
            return;
        }
        let commands = self.commands.clone();
        let grace = self.config.exit_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Purge { id, generation });
            }
        });
    }

    fn purge(&mut self, id: ProcessId, generation: u64) {
        let purge = self
            .processes
            .get(&id)
            .is_some_and(|e| e.record.generation == generation && e.record.status.is_terminal());
        if purge {
            if let Some(mut entry) = self.processes.remove(&id) {
                entry.detach_detector();
            }
            tracing::debug!(process_id = %id, "Purged exited process");
        }
    }

    /// Terminate every live process and wait for them. Returns how many were
    /// running.
    async fn shutdown(&mut self) -> usize {
        let guards: Vec<_> = self
            .processes
            .values_mut()
            .filter_map(|entry| {
                entry.detach_detector();
                entry.guard.take()
            })
            .collect();
        let count = guards.len();
        tracing::info!(count, "Shutting down supervised processes");
        futures_util::future::join_all(guards.into_iter().map(ProcessGuard::terminate)).await;
        count
    }
}
