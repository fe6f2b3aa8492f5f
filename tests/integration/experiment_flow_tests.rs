//! Integration tests for the stress experiment lifecycle: fire-and-forget
//! start, completion reports, liveness, revert, abort, and conflicts.

use std::time::Duration;

use m_agent::protocol::{Response, ResponseKind};

use super::test_helpers::{
    experiment_payload, finished, fixture, spawn_session, DETACHING_STRESS, FAILING_STRESS,
    FAKE_STRESS, FORKING_STRESS, STUBBORN_STRESS,
};

#[tokio::test]
async fn execute_acknowledges_then_reports_completion() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(1)));
    assert_eq!(
        client.expect().await,
        Response::reply(ResponseKind::ActionSuccessful, "exec-1")
    );

    let report = client.expect().await;
    assert_eq!(report.kind, ResponseKind::ActionSuccessful);
    assert_eq!(report.request_id, "");
    assert!(report
        .data
        .as_deref()
        .unwrap()
        .contains("dispatching hogs: 1 cpu"));

    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(
        client.rest().await,
        vec![Response::reply(ResponseKind::CloseConnection, "bye")]
    );
    finished(task).await;
}

#[tokio::test]
async fn failed_process_reports_error_with_stderr() {
    let (_dir, config) = fixture(FAILING_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(5)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    let report = client.expect().await;
    assert_eq!(report.kind, ResponseKind::Error);
    assert_eq!(report.request_id, "");
    let data = report.data.unwrap();
    assert!(
        data.starts_with("stress process failed during execution, err: process exited with code 3"),
        "got {data}"
    );
    assert!(data.contains("cpu stressor crashed"), "got {data}");

    // The completion report does not end the session.
    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(
        client.rest().await,
        vec![Response::reply(ResponseKind::CloseConnection, "bye")]
    );
    finished(task).await;
}

#[tokio::test]
async fn liveness_tracks_the_running_process() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(1)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    client.send("CHECK_LIVENESS", "live-1", None);
    assert_eq!(
        client.expect().await,
        Response::reply(ResponseKind::ActionSuccessful, "live-1")
    );

    // Wait for the completion report, then liveness must fail.
    let report = client.expect().await;
    assert_eq!(report.request_id, "");

    client.send("CHECK_LIVENESS", "live-2", None);
    let responses = client.rest().await;
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert_eq!(responses[0].request_id, "live-2");
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .starts_with("liveness check failed: not running:"));
    assert_eq!(responses[1], Response::reply(ResponseKind::CloseConnection, "live-2"));
    finished(task).await;
}

#[tokio::test]
async fn second_execute_while_running_conflicts_and_closes() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    client.send("EXECUTE_EXPERIMENT", "exec-2", Some(experiment_payload(30)));
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert_eq!(responses[0].request_id, "exec-2");
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .starts_with("experiment execution failed: conflict:"));
    assert_eq!(responses[1], Response::reply(ResponseKind::CloseConnection, "exec-2"));
    finished(task).await;
}

#[tokio::test]
async fn experiment_can_be_restarted_after_it_exits() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(1)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    assert_eq!(client.expect().await.request_id, "");

    client.send("EXECUTE_EXPERIMENT", "exec-2", Some(experiment_payload(1)));
    assert_eq!(
        client.expect().await,
        Response::reply(ResponseKind::ActionSuccessful, "exec-2")
    );
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(client.rest().await.len(), 1);
    finished(task).await;
}

#[tokio::test]
async fn abort_acknowledges_then_closes_without_completion_report() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    client.send("ABORT_EXPERIMENT", "abort-1", None);
    assert_eq!(
        client.rest().await,
        vec![
            Response::reply(ResponseKind::ActionSuccessful, "abort-1"),
            Response::reply(ResponseKind::CloseConnection, "abort-1"),
        ]
    );
    finished(task).await;
}

#[tokio::test]
async fn revert_returns_captured_output() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    // Let the banner reach the capture buffer.
    tokio::time::sleep(Duration::from_millis(300)).await;

    client.send("REVERT_CHAOS", "revert-1", None);
    let (reply, unsolicited) = client.reply_to("revert-1").await;
    assert_eq!(reply.kind, ResponseKind::ActionSuccessful);
    assert!(reply
        .data
        .as_deref()
        .unwrap()
        .contains("dispatching hogs: 1 cpu"));

    client.send("CLOSE_CONNECTION", "bye", None);
    let (close, late) = client.reply_to("bye").await;
    assert_eq!(close.kind, ResponseKind::CloseConnection);

    // A reverted process is not a failure: at most one successful report.
    let reports: Vec<_> = unsolicited.into_iter().chain(late).collect();
    assert!(reports.len() <= 1, "reports: {reports:?}");
    assert!(reports
        .iter()
        .all(|report| report.kind == ResponseKind::ActionSuccessful));
    finished(task).await;
}

#[tokio::test]
async fn revert_escalates_when_sigterm_is_ignored() {
    let (_dir, config) = fixture(STUBBORN_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    tokio::time::sleep(Duration::from_millis(300)).await;

    client.send("REVERT_CHAOS", "revert-1", None);
    let (reply, _) = client.reply_to("revert-1").await;
    assert_eq!(reply.kind, ResponseKind::ActionSuccessful);
    assert!(reply.data.as_deref().unwrap().contains("ignoring SIGTERM"));

    client.send("CHECK_LIVENESS", "live-1", None);
    let (liveness, _) = client.reply_to("live-1").await;
    assert_eq!(liveness.kind, ResponseKind::Error);
    finished(task).await;
}

#[tokio::test]
async fn revert_after_exit_still_returns_output() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(1)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    assert_eq!(client.expect().await.request_id, "");

    client.send("REVERT_CHAOS", "revert-1", None);
    let reply = client.expect().await;
    assert_eq!(reply.kind, ResponseKind::ActionSuccessful);
    assert!(reply.data.as_deref().unwrap().contains("dispatching hogs"));

    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(client.rest().await.len(), 1);
    finished(task).await;
}

#[tokio::test]
async fn revert_without_experiment_closes_the_session() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("REVERT_CHAOS", "revert-1", None);
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .starts_with("chaos revert failed: precondition:"));
    assert_eq!(responses[1].kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn execute_is_accepted_once_the_previous_process_is_reaped() {
    let (_dir, mut config) = fixture(DETACHING_STRESS);
    config.stress.drain_timeout_seconds = 2;
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    // The shell is gone; its background sleep still holds stdout.
    tokio::time::sleep(Duration::from_millis(500)).await;

    client.send("EXECUTE_EXPERIMENT", "exec-2", Some(experiment_payload(30)));
    let (reply, _) = client.reply_to("exec-2").await;
    assert_eq!(reply, Response::reply(ResponseKind::ActionSuccessful, "exec-2"));

    client.send("CLOSE_CONNECTION", "bye", None);
    let (close, _) = client.reply_to("bye").await;
    assert_eq!(close.kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn liveness_reports_the_exit_while_output_drains() {
    let (_dir, mut config) = fixture(DETACHING_STRESS);
    config.stress.drain_timeout_seconds = 2;
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);
    tokio::time::sleep(Duration::from_millis(500)).await;

    client.send("CHECK_LIVENESS", "live-1", None);
    let (reply, _) = client.reply_to("live-1").await;
    assert_eq!(reply.kind, ResponseKind::Error);
    let data = reply.data.unwrap();
    assert!(data.starts_with("liveness check failed: not running:"), "got {data}");
    assert!(data.contains("process exited with code 0"), "got {data}");

    let (close, _) = client.reply_to("live-1").await;
    assert_eq!(close.kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn abort_succeeds_when_output_outlives_the_abort_timeout() {
    let (_dir, mut config) = fixture(FORKING_STRESS);
    config.stress.drain_timeout_seconds = 3;
    config.stress.abort_timeout_seconds = 1;
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    client.send("ABORT_EXPERIMENT", "abort-1", None);
    assert_eq!(
        client.rest().await,
        vec![
            Response::reply(ResponseKind::ActionSuccessful, "abort-1"),
            Response::reply(ResponseKind::CloseConnection, "abort-1"),
        ]
    );
    finished(task).await;
}
