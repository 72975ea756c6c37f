//! Event bus connecting the supervisor to its consumers.
//!
//! The supervisor publishes lifecycle and output events; consumers publish
//! the remote-control events (`runner:get-status`, `runner:restart`,
//! `runner:clear-logs`) that the supervisor subscribes to.
//!
//! # Example
//!
//! ```
//! use devrunner::bus::{Event, EventBus, Topic};
//!
//! let bus = EventBus::new();
//! bus.subscribe_prefix("runner:*", |event| println!("{}", event.topic()));
//! assert_eq!(bus.publish(Event::RequestStatus { process_id: None }), Ok(true));
//! ```

mod dispatch;
mod event;

pub use dispatch::*;
pub use event::*;
