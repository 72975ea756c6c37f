//! Integration tests for event dispatch.

use std::sync::{Arc, Mutex};

use devrunner::bus::{BusError, Event, EventBus, Topic};
use devrunner::supervisor::ProcessId;

fn recorder() -> (Arc<Mutex<Vec<Topic>>>, impl Fn(&Event) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event: &Event| sink.lock().unwrap().push(event.topic()))
}

#[test]
fn wildcard_sees_every_topic_exact_sees_one() {
    let bus = EventBus::new();
    let (all, on_all) = recorder();
    let (errors, on_error) = recorder();
    bus.subscribe_prefix("runner:*", on_all);
    bus.subscribe(Topic::Error, on_error);

    let id = ProcessId::new();
    bus.publish(Event::RequestStatus { process_id: None }).unwrap();
    bus.publish(Event::ClearLogs { process_id: id }).unwrap();
    bus.publish(Event::error(Some(id), "boom")).unwrap();

    assert_eq!(
        *all.lock().unwrap(),
        [Topic::RequestStatus, Topic::ClearLogs, Topic::Error]
    );
    assert_eq!(*errors.lock().unwrap(), [Topic::Error]);
}

#[test]
fn narrower_prefix_only_matches_its_topics() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    bus.subscribe_prefix("runner:re", handler);

    let id = ProcessId::new();
    bus.publish(Event::RequestRestart {
        process_id: id,
        new_command: None,
    })
    .unwrap();
    bus.publish(Event::ClearLogs { process_id: id }).unwrap();

    assert_eq!(*seen.lock().unwrap(), [Topic::RequestRestart]);
}

#[test]
fn error_without_subscriber_is_an_error() {
    let bus = EventBus::new();
    let id = ProcessId::new();

    let err = bus.publish(Event::error(Some(id), "spawn failed")).unwrap_err();
    assert_eq!(
        err,
        BusError::UnhandledError {
            process_id: Some(id),
            message: "spawn failed".to_string(),
        }
    );
    assert!(err.to_string().contains("spawn failed"));
}

#[test]
fn other_topics_without_subscribers_are_dropped_quietly() {
    let bus = EventBus::new();
    let delivered = bus
        .publish(Event::RequestStatus { process_id: None })
        .unwrap();
    assert!(!delivered);
}

#[test]
fn wildcard_subscriber_handles_errors() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    bus.subscribe_prefix("runner:*", handler);

    assert!(bus.publish(Event::error(None, "handled")).unwrap());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn handler_can_publish_reentrantly() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    bus.subscribe(Topic::ClearLogs, handler);

    let inner = bus.clone();
    bus.subscribe(Topic::RequestStatus, move |_| {
        inner
            .publish(Event::ClearLogs {
                process_id: ProcessId::new(),
            })
            .unwrap();
    });

    bus.publish(Event::RequestStatus { process_id: None }).unwrap();
    assert_eq!(*seen.lock().unwrap(), [Topic::ClearLogs]);
}

#[test]
fn topic_names_round_trip() {
    for topic in Topic::ALL {
        assert!(topic.as_str().starts_with("runner:"));
        assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
    }
    assert!("runner:unknown".parse::<Topic>().is_err());
}

#[test]
fn event_serializes_with_type_tag() {
    let event = Event::ClearLogs {
        process_id: ProcessId::new(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "clear-logs");
}
