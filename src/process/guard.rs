//! Scoped ownership of a running child and its stream readers.
//!
//! [`ProcessGuard::launch`] hands the child to a waiter task that also owns
//! both reader tasks. Whatever ends the run (natural exit, `stop`, `restart`,
//! or the guard being dropped), the waiter terminates the child, drains or
//! aborts the readers, and only then reports [`RunEvent::Exited`]. Every
//! output line of a run therefore reaches the supervisor before its exit.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{spawn_reader, ManagedProcess, RunEvent, RunMessage, RunTag, StreamKind};

/// Timing knobs for a guarded run.
#[derive(Debug, Clone, Copy)]
pub struct GuardOptions {
    /// SIGTERM to SIGKILL escalation delay.
    pub terminate_timeout: Duration,
    /// Longest wait for the readers once the child is gone.
    pub drain_timeout: Duration,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            terminate_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Owner of one live run. Dropping it requests termination.
#[derive(Debug)]
pub struct ProcessGuard {
    pid: Option<u32>,
    terminate_tx: Option<oneshot::Sender<()>>,
    exited_rx: Option<oneshot::Receiver<Option<i32>>>,
}

impl ProcessGuard {
    /// Wire readers and the waiter task to a freshly spawned process.
    pub fn launch(
        mut process: ManagedProcess,
        tag: RunTag,
        sink: UnboundedSender<RunMessage>,
        options: GuardOptions,
    ) -> Self {
        let pid = process.id();
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = process.take_stdout() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tag, sink.clone()));
        }
        if let Some(stderr) = process.take_stderr() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tag, sink.clone()));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();

        tokio::spawn(watch(
            process,
            readers,
            terminate_rx,
            exited_tx,
            tag,
            sink,
            options,
        ));

        Self {
            pid,
            terminate_tx: Some(terminate_tx),
            exited_rx: Some(exited_rx),
        }
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the waiter to terminate the child without waiting for it.
    ///
    /// Returns false if termination was already requested or the waiter is
    /// gone (the child has exited).
    pub fn request_termination(&mut self) -> bool {
        match self.terminate_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Terminate the child and wait until it has exited and its readers have
    /// finished. Returns the exit code, if the child produced one.
    pub async fn terminate(mut self) -> Option<i32> {
        self.request_termination();
        match self.exited_rx.take() {
            Some(rx) => rx.await.ok().flatten(),
            None => None,
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.terminate_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn watch(
    mut process: ManagedProcess,
    mut readers: Vec<JoinHandle<()>>,
    terminate_rx: oneshot::Receiver<()>,
    exited_tx: oneshot::Sender<Option<i32>>,
    tag: RunTag,
    sink: UnboundedSender<RunMessage>,
    options: GuardOptions,
) {
    // A dropped guard closes `terminate_rx`, which also ends the run.
    let (status, requested) = tokio::select! {
        status = process.wait() => (status, false),
        _ = terminate_rx => {
            if let Err(e) = process.graceful_terminate(options.terminate_timeout).await {
                tracing::warn!(process_id = %tag.process_id, error = %e, "Termination failed");
            }
            (process.wait().await, true)
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(process_id = %tag.process_id, error = %e, "Failed to wait for process");
            None
        }
    };

    let drain = futures_util::future::join_all(readers.iter_mut());
    if tokio::time::timeout(options.drain_timeout, drain).await.is_err() {
        tracing::debug!(process_id = %tag.process_id, "Readers still open after exit, aborting");
        for reader in &readers {
            reader.abort();
        }
    }

    tracing::debug!(
        process_id = %tag.process_id,
        generation = tag.generation,
        ?exit_code,
        requested,
        "Process exited"
    );
    let _ = sink.send(tag.message(RunEvent::Exited {
        exit_code,
        requested,
    }));
    let _ = exited_tx.send(exit_code);
}
