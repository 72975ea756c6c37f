//! Event bus tests.

mod dispatch_test;

/// Verify the public bus types are exported from the library root.
#[test]
fn test_bus_types_exported() {
    use devrunner::bus::{ExitReason, OutputChunk, SubscriptionId, WeakEventBus};
    use devrunner::{BusError, Event, EventBus, Topic};

    let bus = EventBus::new();
    let _: WeakEventBus = bus.downgrade();
    let _: fn(&EventBus) -> SubscriptionId = |bus| bus.subscribe(Topic::Status, |_| {});
    let _ = ExitReason::Exited;
    let _: Option<OutputChunk> = None;
    let _: Option<BusError> = None;
    let _ = Event::error(None, "boom");
}
