//! Integration tests for bus-driven remote control.

use devrunner::bus::{Event, Topic};
use devrunner::supervisor::{LogKind, ProcessId, LOGS_CLEARED};

use super::setup;

#[tokio::test]
async fn supervisor_listens_on_control_topics() {
    let (context, _recorder) = setup();
    for topic in Topic::ALL.into_iter().filter(|t| t.is_control()) {
        // One supervisor subscription plus the recorder's wildcard.
        assert_eq!(context.bus().subscriber_count(topic), 2, "{topic}");
    }
}

#[tokio::test]
async fn status_request_for_one_process() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();
    supervisor.add_log(id, LogKind::Stdout, "booted").await;

    context
        .bus()
        .publish(Event::RequestStatus {
            process_id: Some(id),
        })
        .unwrap();

    let Event::Status { process, logs } = recorder
        .wait_for(|e| matches!(e, Event::Status { logs: Some(_), .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(process.id, id);
    assert_eq!(logs.unwrap()[0].content, "booted");

    supervisor.stop(id).await;
}

#[tokio::test]
async fn status_request_without_id_covers_every_process() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let first = supervisor.start("sleep 30", None).await.unwrap();
    let second = supervisor.start("sleep 30", None).await.unwrap();

    context
        .bus()
        .publish(Event::RequestStatus { process_id: None })
        .unwrap();
    recorder
        .wait_for_nth(2, |e| matches!(e, Event::Status { logs: Some(_), .. }))
        .await;

    for id in [first, second] {
        assert_eq!(
            recorder.count(
                |e| matches!(e, Event::Status { process, logs: Some(_) } if process.id == id)
            ),
            1
        );
    }

    supervisor.stop_all().await;
}

#[tokio::test]
async fn restart_request_respawns_process() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();

    context
        .bus()
        .publish(Event::RequestRestart {
            process_id: id,
            new_command: Some("sleep 29".to_string()),
        })
        .unwrap();

    let Event::Restarted { new_command, .. } = recorder
        .wait_for(|e| matches!(e, Event::Restarted { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(new_command, "sleep 29");
    assert!(supervisor.is_running(id).await);

    supervisor.stop(id).await;
}

#[tokio::test]
async fn restart_request_for_unknown_process_publishes_error() {
    let (context, recorder) = setup();
    let unknown = ProcessId::new();

    context
        .bus()
        .publish(Event::RequestRestart {
            process_id: unknown,
            new_command: None,
        })
        .unwrap();

    let Event::Error { process_id, message } = recorder
        .wait_for(|e| matches!(e, Event::Error { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(process_id, Some(unknown));
    assert!(message.contains(&unknown.to_string()));
}

#[tokio::test]
async fn clear_logs_request() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();
    supervisor.add_log(id, LogKind::Stdout, "noise").await;

    context
        .bus()
        .publish(Event::ClearLogs { process_id: id })
        .unwrap();
    recorder
        .wait_for(|e| matches!(e, Event::Status { logs: Some(_), .. }))
        .await;

    let logs = supervisor.get_process_logs(id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].content, LOGS_CLEARED);

    supervisor.stop(id).await;
}
