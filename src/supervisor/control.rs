//! Remote control over the bus.
//!
//! The supervisor listens on the three inbound topics and forwards each
//! request into its own mailbox. Bus handlers are synchronous, so nothing
//! here awaits.

use tokio::sync::mpsc::WeakUnboundedSender;

use super::runner::Command;
use crate::bus::{Event, EventBus, SubscriptionId, Topic};

/// Subscribe the inbound control topics. Returns the subscriptions so the
/// control task can remove them when it exits.
pub(crate) fn subscribe(
    bus: &EventBus,
    commands: WeakUnboundedSender<Command>,
) -> Vec<(Topic, SubscriptionId)> {
    [Topic::RequestStatus, Topic::RequestRestart, Topic::ClearLogs]
        .into_iter()
        .map(|topic| {
            let commands = commands.clone();
            let id = bus.subscribe(topic, move |event| forward(&commands, event));
            (topic, id)
        })
        .collect()
}

fn forward(commands: &WeakUnboundedSender<Command>, event: &Event) {
    let command = match event {
        Event::RequestStatus { process_id } => Command::RemoteStatus { id: *process_id },
        Event::RequestRestart {
            process_id,
            new_command,
        } => Command::RemoteRestart {
            id: *process_id,
            new_command: new_command.clone(),
        },
        Event::ClearLogs { process_id } => Command::RemoteClearLogs { id: *process_id },
        _ => return,
    };

    match commands.upgrade() {
        Some(tx) => {
            tracing::debug!(topic = %event.topic(), "Forwarding remote control request");
            let _ = tx.send(command);
        }
        None => tracing::debug!(topic = %event.topic(), "Supervisor gone, dropping request"),
    }
}
