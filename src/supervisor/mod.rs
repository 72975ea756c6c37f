//! Process supervisor: records, lifecycle and the control task that owns them.

mod control;
mod handle;
mod logs;
mod record;
mod runner;
mod state;

pub use handle::*;
pub use logs::*;
pub use record::*;
pub use state::*;
