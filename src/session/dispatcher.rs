//! Action dispatcher and per-session state machine.
//!
//! | Action               | Success                                  | Failure                   |
//! |----------------------|------------------------------------------|---------------------------|
//! | `CHECK_STEADY_STATE` | `ACTION_SUCCESSFUL`                      | `ERROR`, close            |
//! | `EXECUTE_EXPERIMENT` | `ACTION_SUCCESSFUL` once spawned         | `ERROR`, close            |
//! | `CHECK_LIVENESS`     | `ACTION_SUCCESSFUL`                      | `ERROR`, close            |
//! | `EXECUTE_COMMAND`    | `ACTION_SUCCESSFUL` with stdout          | `PROBE_ERROR`, keep going |
//! | `REVERT_CHAOS`       | `ACTION_SUCCESSFUL` with captured stdout | `ERROR`, close            |
//! | `ABORT_EXPERIMENT`   | `ACTION_SUCCESSFUL`, `CLOSE_CONNECTION`  | `ERROR`, close            |
//! | `CLOSE_CONNECTION`   | `CLOSE_CONNECTION`                       | —                         |
//! | *(unknown)*          | —                                        | `INVALID_ACTION`, close   |
//!
//! Every closing failure is followed by `CLOSE_CONNECTION`.

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};

use super::outbound::Outbound;
use crate::config::{GlobalConfig, ProbeConfig};
use crate::experiment::{ExperimentController, ProcessHandle, StressParameters};
use crate::probe::{self, ProbeRequest};
use crate::protocol::{ActionKind, InboundMessage, Response, ResponseKind};
use crate::{AppError, Result};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next message.
    Listening,
    /// Handling one action.
    Processing,
    /// Terminal; no further messages are processed.
    Closed,
}

/// What the session loop should do after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading messages.
    Continue,
    /// Stop reading and close the connection.
    Close,
}

/// Interprets decoded actions for one session.
///
/// Owns the session's (at most one) [`ProcessHandle`].
pub struct Dispatcher {
    controller: ExperimentController,
    probe: ProbeConfig,
    outbound: Arc<Outbound>,
    process: Option<ProcessHandle>,
    state: SessionState,
}

impl Dispatcher {
    /// Create a dispatcher writing through `outbound`.
    #[must_use]
    pub fn new(session_id: &str, config: &GlobalConfig, outbound: Arc<Outbound>) -> Self {
        Self {
            controller: ExperimentController::new(session_id, config.stress.clone()),
            probe: config.probe.clone(),
            outbound,
            process: None,
            state: SessionState::Listening,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The experiment process, if one was started.
    #[must_use]
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Handle one decoded message.
    pub async fn dispatch(&mut self, message: InboundMessage) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Close;
        }

        self.state = SessionState::Processing;
        let span = info_span!(
            "action",
            action = %message.action,
            request_id = %message.request_id
        );
        let flow = self.handle(message).instrument(span).await;
        self.settle(flow)
    }

    /// Report a frame that could not be read or decoded, then close.
    pub async fn reject_frame(&mut self, request_id: &str, err: &AppError) -> Flow {
        self.state = SessionState::Processing;
        let flow = self.fail(request_id, "client message read failed", err).await;
        self.settle(flow)
    }

    /// Tell the client the agent is shutting down.
    pub async fn shutdown_notice(&mut self) -> Flow {
        self.outbound.begin_close().await;
        if let Err(err) = self
            .outbound
            .send(&Response::unsolicited(ResponseKind::CloseConnection))
            .await
        {
            warn!(%err, "failed to send shutdown notice");
        }
        self.settle(Flow::Close)
    }

    /// Stop a still-running experiment; called once the session is ending.
    pub async fn release(&mut self) {
        if let Some(handle) = self.process.take() {
            if handle.is_running() {
                info!(pid = handle.pid(), "stopping experiment before closing session");
                if let Err(err) = self.controller.abort(Some(&handle)).await {
                    warn!(%err, pid = handle.pid(), "failed to stop experiment on close");
                }
            }
        }
        self.state = SessionState::Closed;
    }

    fn settle(&mut self, flow: Flow) -> Flow {
        self.state = match flow {
            Flow::Continue => SessionState::Listening,
            Flow::Close => SessionState::Closed,
        };
        flow
    }

    async fn handle(&mut self, message: InboundMessage) -> Flow {
        let InboundMessage {
            action,
            request_id,
            payload,
        } = message;

        match action {
            ActionKind::CheckSteadyState => {
                let result = self.controller.check_steady_state().await.map(|_| None);
                self.conclude(&request_id, "steady state check failed", result)
                    .await
            }
            ActionKind::ExecuteExperiment => {
                let result = self.execute_experiment(&payload).map(|()| None);
                self.conclude(&request_id, "experiment execution failed", result)
                    .await
            }
            ActionKind::CheckLiveness => {
                let result = self
                    .controller
                    .check_liveness(self.process.as_ref())
                    .map(|()| None);
                self.conclude(&request_id, "liveness check failed", result)
                    .await
            }
            ActionKind::ExecuteCommand => {
                let result = match ProbeRequest::from_payload(&payload) {
                    Ok(request) => probe::execute(&self.probe, &request).await.map(Some),
                    Err(err) => Err(err),
                };
                self.conclude(&request_id, "command probe failed", result)
                    .await
            }
            ActionKind::RevertChaos => {
                let result = self
                    .controller
                    .revert(self.process.as_ref())
                    .await
                    .map(Some);
                self.conclude(&request_id, "chaos revert failed", result)
                    .await
            }
            ActionKind::AbortExperiment => self.abort_experiment(&request_id).await,
            ActionKind::CloseConnection => self.close_connection(&request_id).await,
            ActionKind::Unknown(raw) => {
                let err = AppError::InvalidAction(format!("unrecognised action '{raw}'"));
                self.fail(&request_id, "client action rejected", &err).await
            }
        }
    }

    fn execute_experiment(&mut self, payload: &[u8]) -> Result<()> {
        if let Some(running) = self.process.as_ref().filter(|handle| handle.is_running()) {
            return Err(AppError::Conflict(format!(
                "an experiment is already running (pid {})",
                running.pid()
            )));
        }

        let params = StressParameters::from_payload(payload)?;
        let handle = self.controller.start(&params, Arc::clone(&self.outbound))?;
        // Only an exited handle can be replaced here.
        self.process = Some(handle);
        Ok(())
    }

    async fn abort_experiment(&mut self, request_id: &str) -> Flow {
        // The session ends whatever happens; silence the monitor first.
        self.outbound.begin_close().await;

        if let Err(err) = self.controller.abort(self.process.as_ref()).await {
            return self.fail(request_id, "chaos abort failed", &err).await;
        }

        if let Err(err) = self
            .outbound
            .send(&Response::reply(ResponseKind::ActionSuccessful, request_id))
            .await
        {
            warn!(%err, "failed to acknowledge abort");
            return Flow::Close;
        }
        self.say_goodbye(request_id).await
    }

    async fn close_connection(&mut self, request_id: &str) -> Flow {
        self.outbound.begin_close().await;
        self.say_goodbye(request_id).await
    }

    async fn say_goodbye(&self, request_id: &str) -> Flow {
        if let Err(err) = self
            .outbound
            .send(&Response::reply(ResponseKind::CloseConnection, request_id))
            .await
        {
            warn!(%err, "failed to send close notice");
        }
        Flow::Close
    }

    /// Turn a handler result into a response.
    async fn conclude(
        &self,
        request_id: &str,
        context: &str,
        result: Result<Option<String>>,
    ) -> Flow {
        match result {
            Ok(data) => {
                let mut response = Response::reply(ResponseKind::ActionSuccessful, request_id);
                if let Some(data) = data {
                    response = response.with_data(data);
                }
                self.reply(&response).await
            }
            Err(err) if !err.is_terminal() => {
                warn!(%err, "{context}");
                let response = Response::reply(ResponseKind::ProbeError, request_id)
                    .with_data(format!("{context}: {err}"));
                self.reply(&response).await
            }
            Err(err) => self.fail(request_id, context, &err).await,
        }
    }

    async fn reply(&self, response: &Response) -> Flow {
        match self.outbound.send(response).await {
            Ok(()) => Flow::Continue,
            Err(err) => {
                warn!(%err, kind = %response.kind, "failed to send response, closing session");
                Flow::Close
            }
        }
    }

    /// Report a terminating failure, then announce the close.
    async fn fail(&self, request_id: &str, context: &str, err: &AppError) -> Flow {
        error!(%err, "{context}");
        self.outbound.begin_close().await;

        let kind = match err {
            AppError::InvalidAction(_) => ResponseKind::InvalidAction,
            _ => ResponseKind::Error,
        };
        let notice = Response::reply(kind, request_id).with_data(format!("{context}: {err}"));
        if let Err(send_err) = self.outbound.send(&notice).await {
            warn!(err = %send_err, "failed to notify client of failure");
            return Flow::Close;
        }
        self.say_goodbye(request_id).await
    }
}
