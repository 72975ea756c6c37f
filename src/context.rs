//! Shared context for the runner.

use crate::bus::EventBus;
use crate::config::RunnerConfig;
use crate::supervisor::Supervisor;

/// Owns the bus and supervisor for one runner instance.
///
/// Built once at startup and passed to whatever needs either of them.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    config: RunnerConfig,
    bus: EventBus,
    supervisor: Supervisor,
}

impl RunnerContext {
    /// Create the bus and spawn the supervisor's control task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let bus = EventBus::new();
        let supervisor = Supervisor::spawn(bus.clone(), config.clone());
        Self {
            config,
            bus,
            supervisor,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}
