//! devrunner - Supervise local dev servers and surface their URLs.

pub mod bus;
pub mod config;
pub mod context;
pub mod display;
pub mod process;
pub mod sniffer;
pub mod supervisor;

pub use bus::{BusError, Event, EventBus, Topic};
pub use config::RunnerConfig;
pub use context::RunnerContext;
pub use supervisor::{ProcessId, ProcessStatus, ServerInfo, Supervisor, SupervisorError};
