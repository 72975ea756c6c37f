//! Integration tests for per-process log buffers.

use devrunner::bus::Event;
use devrunner::config::RunnerConfig;
use devrunner::supervisor::{LogKind, LOGS_CLEARED};

use super::{setup, setup_with, test_config};

#[tokio::test]
async fn buffer_keeps_most_recent_entries() {
    let (context, _recorder) = setup_with(RunnerConfig {
        log_capacity: 5,
        ..test_config()
    });
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();

    for i in 0..8 {
        assert!(supervisor.add_log(id, LogKind::Stdout, format!("line {i}")).await);
    }

    let logs = supervisor.get_process_logs(id).await;
    let contents: Vec<_> = logs.iter().map(|l| l.content.as_str()).collect();
    assert_eq!(contents, ["line 3", "line 4", "line 5", "line 6", "line 7"]);
    assert!(logs.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert!(logs.iter().all(|l| l.process_id == id));

    supervisor.stop(id).await;
}

#[tokio::test]
async fn clearing_leaves_sentinel_and_publishes_status() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();
    let id = supervisor.start("sleep 30", None).await.unwrap();

    supervisor.add_log(id, LogKind::Stderr, "warning").await;
    assert!(supervisor.clear_process_logs(id).await);

    let logs = supervisor.get_process_logs(id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::System);
    assert_eq!(logs[0].content, LOGS_CLEARED);

    let Event::Status { logs, .. } = recorder
        .wait_for(|e| matches!(e, Event::Status { logs: Some(_), .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(logs.unwrap().len(), 1);

    supervisor.stop(id).await;
}

#[tokio::test]
async fn stderr_output_is_logged_separately() {
    let (context, recorder) = setup();
    let supervisor = context.supervisor();

    // `ls` on a missing path writes to stderr and exits non-zero.
    let id = supervisor
        .start("ls /devrunner-test-missing-path", None)
        .await
        .unwrap();
    recorder
        .wait_for(|e| matches!(e, Event::Stopped { process_id, .. } if *process_id == id))
        .await;

    let logs = supervisor.get_process_logs(id).await;
    assert!(logs.iter().any(|l| l.kind == LogKind::Stderr));
    assert!(logs.iter().all(|l| l.kind != LogKind::Stdout));
}
