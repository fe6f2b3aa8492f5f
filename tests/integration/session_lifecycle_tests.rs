//! Integration tests for the session state machine over an in-memory
//! transport: request correlation, terminating errors, probe errors, and
//! every way a session can end.

use m_agent::protocol::{Response, ResponseKind};
use m_agent::session::Frame;
use m_agent::AppError;

use super::test_helpers::{experiment_payload, finished, fixture, spawn_session, FAKE_STRESS};

#[tokio::test]
async fn steady_state_check_succeeds_and_echoes_request_id() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("CHECK_STEADY_STATE", "steady-1", None);
    let response = client.expect().await;
    assert_eq!(response.kind, ResponseKind::ActionSuccessful);
    assert_eq!(response.request_id, "steady-1");

    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(
        client.rest().await,
        vec![Response::reply(ResponseKind::CloseConnection, "bye")]
    );
    finished(task).await;
}

#[tokio::test]
async fn steady_state_check_fails_without_stress_tool() {
    let (_dir, mut config) = fixture(FAKE_STRESS);
    config.stress.binary = "/nonexistent/stress-ng".into();
    config.stress.leading_args.clear();
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("CHECK_STEADY_STATE", "steady-1", None);
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .starts_with("steady state check failed: spawn:"));
    assert_eq!(responses[1], Response::reply(ResponseKind::CloseConnection, "steady-1"));
    finished(task).await;
}

#[tokio::test]
async fn liveness_before_execute_closes_the_session() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("CHECK_LIVENESS", "live-1", None);
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert_eq!(responses[0].request_id, "live-1");
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .contains("no experiment has been started"));
    assert_eq!(responses[1].kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn probe_error_keeps_session_usable() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send(
        "EXECUTE_COMMAND",
        "probe-1",
        Some(serde_json::json!("echo unhealthy >&2; exit 2")),
    );
    let failed = client.expect().await;
    assert_eq!(failed.kind, ResponseKind::ProbeError);
    assert_eq!(failed.request_id, "probe-1");
    assert!(failed.data.as_deref().unwrap().contains("unhealthy"));

    client.send("EXECUTE_COMMAND", "probe-2", Some(serde_json::json!("echo healthy")));
    assert_eq!(
        client.expect().await,
        Response::reply(ResponseKind::ActionSuccessful, "probe-2").with_data("healthy\n")
    );

    client.send("CLOSE_CONNECTION", "bye", None);
    assert_eq!(
        client.rest().await,
        vec![Response::reply(ResponseKind::CloseConnection, "bye")]
    );
    finished(task).await;
}

#[tokio::test]
async fn unknown_action_is_invalid_and_closes() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("SELF_DESTRUCT", "odd-1", None);
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::InvalidAction);
    assert_eq!(responses[0].request_id, "odd-1");
    assert_eq!(responses[1], Response::reply(ResponseKind::CloseConnection, "odd-1"));
    finished(task).await;
}

#[tokio::test]
async fn malformed_frame_salvages_request_id() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send_raw(r#"{"requestID":"bad-1","payload":"no action"}"#);
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert_eq!(responses[0].request_id, "bad-1");
    assert!(responses[0]
        .data
        .as_deref()
        .unwrap()
        .starts_with("client message read failed: malformed envelope:"));
    assert_eq!(responses[1].kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn read_error_closes_the_session() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.frame(Err(AppError::Transport("read failed: reset by peer".into())));
    let responses = client.rest().await;
    assert_eq!(responses.len(), 2, "responses: {responses:?}");
    assert_eq!(responses[0].kind, ResponseKind::Error);
    assert_eq!(responses[0].request_id, "");
    assert_eq!(responses[1].kind, ResponseKind::CloseConnection);
    finished(task).await;
}

#[tokio::test]
async fn close_frame_ends_session_quietly() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.frame(Ok(Frame::Closed));
    assert!(client.rest().await.is_empty());
    finished(task).await;
}

#[tokio::test]
async fn disconnect_while_running_stops_the_experiment() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    client.send("EXECUTE_EXPERIMENT", "exec-1", Some(experiment_payload(30)));
    assert_eq!(
        client.expect().await,
        Response::reply(ResponseKind::ActionSuccessful, "exec-1")
    );

    client.disconnect();
    // The experiment is killed silently; nothing else reaches the client.
    assert!(client.rest().await.is_empty());
    finished(task).await;
}

#[tokio::test]
async fn agent_shutdown_sends_unsolicited_close() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, shutdown) = spawn_session(&config);

    client.send("CHECK_STEADY_STATE", "steady-1", None);
    assert_eq!(client.expect().await.kind, ResponseKind::ActionSuccessful);

    shutdown.cancel();
    assert_eq!(
        client.rest().await,
        vec![Response::unsolicited(ResponseKind::CloseConnection)]
    );
    finished(task).await;
}

#[tokio::test]
async fn messages_are_answered_in_order() {
    let (_dir, config) = fixture(FAKE_STRESS);
    let (mut client, task, _shutdown) = spawn_session(&config);

    for n in 1..=3 {
        client.send(
            "EXECUTE_COMMAND",
            &format!("probe-{n}"),
            Some(serde_json::json!(format!("echo {n}"))),
        );
    }
    client.send("CLOSE_CONNECTION", "bye", None);

    let ids: Vec<_> = client
        .rest()
        .await
        .into_iter()
        .map(|response| response.request_id)
        .collect();
    assert_eq!(ids, vec!["probe-1", "probe-2", "probe-3", "bye"]);
    finished(task).await;
}
