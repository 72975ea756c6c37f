//! Integration tests for process lifecycle: start, exit, stop, restart.

use std::time::Duration;

use devrunner::bus::{Event, ExitReason, Topic};
use devrunner::config::RunnerConfig;
use devrunner::process::SpawnError;
use devrunner::supervisor::{LogKind, ProcessId, ProcessInfoUpdate, ProcessStatus, SupervisorError};

use super::{setup, setup_with, test_config};

const MISSING_BINARY: &str = "devrunner-test-no-such-binary";

fn stopped_for(id: ProcessId) -> impl Fn(&Event) -> bool {
    move |event| matches!(event, Event::Stopped { process_id, .. } if *process_id == id)
}

#[tokio::test]
async fn echo_runs_to_completion() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("echo hello", None).await.unwrap();
    let Event::Stopped {
        exit_code, reason, ..
    } = recorder.wait_for(stopped_for(id)).await
    else {
        unreachable!()
    };
    assert_eq!(exit_code, Some(0));
    assert_eq!(reason, ExitReason::Exited);

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Stopped);
    assert_eq!(info.exit_code, Some(0));
    assert_eq!(info.command, "echo hello");
    assert!(!supervisor.is_running(id).await);

    let logs = supervisor.get_process_logs(id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::Stdout);
    assert!(logs[0].content.contains("hello"));
}

#[tokio::test]
async fn lifecycle_events_are_ordered() {
    let (context, recorder) = setup();
    let id = context.supervisor().start(r"printf a\nb\nc\n", None).await.unwrap();
    recorder.wait_for(stopped_for(id)).await;

    let topics: Vec<_> = recorder
        .events()
        .iter()
        .filter(|e| e.process_id() == Some(id))
        .map(Event::topic)
        .collect();
    assert_eq!(
        topics,
        [
            Topic::Status,
            Topic::Started,
            Topic::Output,
            Topic::Output,
            Topic::Output,
            Topic::Stopped,
        ]
    );

    let chunks: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Output(output) => Some(output.chunk),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, ["a", "b", "c"]);
}

#[tokio::test]
async fn nonzero_exit_is_an_error() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("false", None).await.unwrap();
    let Event::Stopped { exit_code, .. } = recorder.wait_for(stopped_for(id)).await else {
        unreachable!()
    };
    assert_eq!(exit_code, Some(1));

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error);
    let logs = supervisor.get_process_logs(id).await;
    assert!(logs
        .iter()
        .any(|l| l.kind == LogKind::Error && l.content.contains("code 1")));
}

#[tokio::test]
async fn spawn_failure_still_returns_an_id() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start(MISSING_BINARY, None).await.unwrap();

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error);
    assert!(info.pid.is_none());

    let logs = supervisor.get_process_logs(id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::Error);
    assert!(logs[0].content.contains(MISSING_BINARY));

    assert_eq!(
        recorder.count(|e| matches!(e, Event::Error { process_id: Some(p), .. } if *p == id)),
        1
    );
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let (context, _recorder) = setup();
    let err = context.supervisor().start("   ", None).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(SpawnError::EmptyCommand)));
    assert!(context.supervisor().get_all_processes().await.is_empty());
}

#[tokio::test]
async fn start_uses_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor
        .start("pwd", Some(dir.path().to_path_buf()))
        .await
        .unwrap();
    recorder.wait_for(stopped_for(id)).await;

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.cwd.as_deref(), Some(dir.path()));
    let logs = supervisor.get_process_logs(id).await;
    let expected = dir.path().canonicalize().unwrap();
    let printed = std::path::PathBuf::from(&logs[0].content).canonicalize().unwrap();
    assert_eq!(printed, expected);
}

#[tokio::test]
async fn stop_terminates_running_process() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("sleep 30", None).await.unwrap();
    assert!(supervisor.is_running(id).await);

    assert!(supervisor.stop(id).await);
    assert!(!supervisor.is_running(id).await);
    assert_eq!(
        supervisor.get_server_info(id).await.unwrap().status,
        ProcessStatus::Stopped
    );

    let Event::Stopped { reason, .. } = recorder.wait_for(stopped_for(id)).await else {
        unreachable!()
    };
    assert_eq!(reason, ExitReason::Stopped);
    assert_eq!(
        supervisor.get_server_info(id).await.unwrap().status,
        ProcessStatus::Stopped
    );

    // Nothing left to stop.
    assert!(!supervisor.stop(id).await);
}

#[tokio::test]
async fn unknown_ids_are_reported_as_false() {
    let (context, _recorder) = setup();
    let supervisor = context.supervisor();
    let id = ProcessId::new();

    assert!(!supervisor.stop(id).await);
    assert!(!supervisor.restart(id, None).await);
    assert!(
        !supervisor
            .update_process_info(id, ProcessInfoUpdate::default())
            .await
    );
    assert!(!supervisor.add_log(id, LogKind::Stdout, "x").await);
    assert!(!supervisor.clear_process_logs(id).await);
    assert!(!supervisor.is_running(id).await);
    assert!(supervisor.get_server_info(id).await.is_none());
    assert!(supervisor.get_process_logs(id).await.is_empty());
}

#[tokio::test]
async fn restart_keeps_command_and_renews_run() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("sleep 30", None).await.unwrap();
    let before = supervisor.get_server_info(id).await.unwrap();
    let detectors = context.bus().subscriber_count(Topic::Output);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(supervisor.restart(id, None).await);

    let after = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.command, "sleep 30");
    assert_eq!(after.status, ProcessStatus::Active);
    assert_eq!(after.restart_count, 1);
    assert!(after.start_time > before.start_time);
    assert!(after.pid.is_some());
    assert_ne!(after.pid, before.pid);
    assert_eq!(context.bus().subscriber_count(Topic::Output), detectors);

    let Event::Stopped { reason, .. } = recorder.wait_for(stopped_for(id)).await else {
        unreachable!()
    };
    assert_eq!(reason, ExitReason::Restarted);
    let Event::Restarted {
        old_command,
        new_command,
        ..
    } = recorder
        .wait_for(|e| matches!(e, Event::Restarted { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(old_command, "sleep 30");
    assert_eq!(new_command, "sleep 30");

    assert_eq!(supervisor.stop_all().await, 1);
}

#[tokio::test]
async fn restart_with_new_command() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("sleep 30", None).await.unwrap();
    assert!(supervisor.restart(id, Some("sleep 31".to_string())).await);

    let Event::Restarted {
        process_id,
        old_command,
        new_command,
        process,
    } = recorder
        .wait_for(|e| matches!(e, Event::Restarted { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(process_id, id);
    assert_eq!(old_command, "sleep 30");
    assert_eq!(new_command, "sleep 31");
    assert_eq!(process.command, "sleep 31");
    assert_eq!(
        supervisor.get_server_info(id).await.unwrap().command,
        "sleep 31"
    );

    supervisor.stop(id).await;
}

#[tokio::test]
async fn failed_respawn_keeps_previous_command() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("sleep 30", None).await.unwrap();
    assert!(!supervisor.restart(id, Some(MISSING_BINARY.to_string())).await);

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error);
    assert_eq!(info.command, "sleep 30");
    assert!(info.pid.is_none());
    assert_eq!(
        recorder.count(|e| matches!(e, Event::Error { process_id: Some(p), .. } if *p == id)),
        1
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Restarted { .. })), 0);
}

#[tokio::test]
async fn restart_after_exit_runs_again() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor.start("echo again", None).await.unwrap();
    recorder.wait_for(stopped_for(id)).await;

    assert!(supervisor.restart(id, None).await);
    recorder
        .wait_for(|e| {
            matches!(e, Event::Stopped { process_id, reason: ExitReason::Exited, process, .. }
                if *process_id == id && process.restart_count == 1)
        })
        .await;

    let logs = supervisor.get_process_logs(id).await;
    assert_eq!(logs.iter().filter(|l| l.content == "again").count(), 2);
    assert_eq!(recorder.count(stopped_for(id)), 2);
    assert_eq!(
        recorder.count(|e| matches!(e, Event::Stopped { reason: ExitReason::Restarted, .. })),
        0
    );
}

#[tokio::test]
async fn update_process_info_merges_fields() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();

    let update = ProcessInfoUpdate {
        name: Some("api".to_string()),
        port: Some(8080),
        ..Default::default()
    };
    assert!(supervisor.update_process_info(id, update.clone()).await);

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.name, "api");
    assert_eq!(info.port, Some(8080));
    assert!(info.server_url.is_none());

    let Event::InfoUpdated { changes, .. } = recorder
        .wait_for(|e| matches!(e, Event::InfoUpdated { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(changes, update);

    supervisor.stop(id).await;
}

#[tokio::test]
async fn detected_url_is_recorded() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    let id = supervisor
        .start("echo ➜ Local: http://localhost:5173/", None)
        .await
        .unwrap();

    let Event::Started { process } = recorder
        .wait_for(|e| matches!(e, Event::Started { process } if process.server_url.is_some()))
        .await
    else {
        unreachable!()
    };
    assert_eq!(process.id, id);
    assert_eq!(process.server_url.as_deref(), Some("http://localhost:5173/"));
    assert_eq!(process.host.as_deref(), Some("localhost"));
    assert_eq!(process.port, Some(5173));

    let info = supervisor.get_server_info(id).await.unwrap();
    assert_eq!(info.port, Some(5173));
}

#[tokio::test]
async fn no_started_event_follows_stopped() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    for _ in 0..20 {
        let id = supervisor
            .start("echo Local: http://localhost:5173/", None)
            .await
            .unwrap();
        recorder.wait_for(stopped_for(id)).await;
        // Detections queued before the exit are handled ahead of this request.
        let _ = supervisor.get_server_info(id).await;

        let events = recorder.events();
        let stopped_at = events.iter().position(stopped_for(id)).unwrap();
        assert!(!events[stopped_at..]
            .iter()
            .any(|e| matches!(e, Event::Started { process } if process.id == id)));
    }
}

#[tokio::test]
async fn processes_listed_oldest_first() {
    let (context, _recorder) = setup();
    let supervisor = context.supervisor();

    let first = supervisor.start("sleep 30", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = supervisor.start("sleep 30", None).await.unwrap();

    let ids: Vec<_> = supervisor
        .get_all_processes()
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, [first, second]);

    assert_eq!(supervisor.stop_all().await, 2);
    assert!(!supervisor.is_running(first).await);
    assert!(!supervisor.is_running(second).await);
}

#[tokio::test]
async fn exited_processes_are_purged_after_grace() {
    let (context, recorder) = setup_with(RunnerConfig {
        purge_exited: true,
        exit_grace_ms: 300,
        ..test_config()
    });
    let supervisor = context.supervisor();

    let id = supervisor.start("echo bye", None).await.unwrap();
    recorder.wait_for(stopped_for(id)).await;
    assert!(supervisor.get_server_info(id).await.is_some());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(supervisor.get_server_info(id).await.is_none());
    assert!(supervisor.get_all_processes().await.is_empty());
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let (context, _recorder) = setup();
    let supervisor = context.supervisor();
    supervisor.start("sleep 30", None).await.unwrap();

    assert_eq!(supervisor.shutdown().await.unwrap(), 1);
    let err = supervisor.start("sleep 30", None).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ControlTaskGone));
}
