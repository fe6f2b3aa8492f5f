#![forbid(unsafe_code)]

//! `m-agent-ctl` — command-line client for `m-agent`.
//!
//! Connects to the agent's control WebSocket, sends a sequence of actions,
//! and prints every response. Useful for driving an experiment by hand:
//!
//! ```text
//! m-agent-ctl CHECK_STEADY_STATE \
//!     'EXECUTE_EXPERIMENT={"Workers":"2","Load":"50","Timeout":"10"}' \
//!     CHECK_LIVENESS --await-completion
//! ```

use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "m-agent-ctl",
    about = "Drive an m-agent over its control WebSocket",
    version,
    long_about = None
)]
struct Cli {
    /// Control endpoint of the agent.
    #[arg(long, default_value = "ws://127.0.0.1:41365/cpu-stress")]
    url: String,

    /// After the last step, wait for the experiment's completion report.
    #[arg(long)]
    await_completion: bool,

    /// Seconds to wait for each response.
    #[arg(long, default_value_t = 60)]
    timeout_seconds: u64,

    /// Steps to run, in order, as `ACTION` or `ACTION=PAYLOAD`.
    ///
    /// A payload that parses as JSON is sent as JSON; anything else is sent
    /// as a string.
    #[arg(required = true)]
    steps: Vec<String>,
}

/// One parsed step.
#[derive(Debug)]
struct Step {
    action: String,
    payload: Option<serde_json::Value>,
}

impl Step {
    fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((action, payload)) => Self {
                action: action.trim().to_uppercase(),
                payload: Some(
                    serde_json::from_str(payload)
                        .unwrap_or_else(|_| serde_json::Value::String(payload.to_owned())),
                ),
            },
            None => Self {
                action: raw.trim().to_uppercase(),
                payload: None,
            },
        }
    }
}

/// Fields of an agent response the client cares about.
#[derive(Debug)]
struct Reply {
    kind: String,
    request_id: String,
    data: Option<String>,
}

impl Reply {
    fn parse(text: &str) -> CtlResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        };
        Ok(Self {
            kind: field("type").unwrap_or_default(),
            request_id: field("requestID").unwrap_or_default(),
            data: field("data"),
        })
    }

    fn ends_session(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "CLOSE_CONNECTION" | "ERROR" | "INVALID_ACTION"
        )
    }

    fn print(&self) {
        let tag = if self.request_id.is_empty() {
            "unsolicited"
        } else {
            self.request_id.as_str()
        };
        match &self.data {
            Some(data) if !data.is_empty() => println!("[{tag}] {}: {data}", self.kind),
            _ => println!("[{tag}] {}", self.kind),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Cli::parse();

    match run(&args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!("Is m-agent listening on '{}'?", args.url);
            std::process::exit(1);
        }
    }
}

/// Run every step; returns `false` if the agent reported a failure.
async fn run(args: &Cli) -> CtlResult<bool> {
    let (mut socket, _) = connect_async(args.url.as_str()).await?;
    let timeout = Duration::from_secs(args.timeout_seconds);
    let mut healthy = true;

    for (index, raw) in args.steps.iter().enumerate() {
        let step = Step::parse(raw);
        let request_id = format!("ctl-{}", index + 1);
        send(&mut socket, &step, &request_id).await?;

        let reply = await_reply(&mut socket, &request_id, timeout).await?;
        reply.print();
        if reply.kind != "ACTION_SUCCESSFUL" && reply.kind != "CLOSE_CONNECTION" {
            healthy = false;
        }
        if reply.ends_session() || step.action == "ABORT_EXPERIMENT" {
            // The agent closes after these; drain its final notices.
            drain(&mut socket, timeout).await;
            return Ok(healthy);
        }
    }

    if args.await_completion {
        let report = await_reply(&mut socket, "", timeout).await?;
        report.print();
        healthy &= report.kind == "ACTION_SUCCESSFUL";
    }

    let goodbye = Step {
        action: "CLOSE_CONNECTION".into(),
        payload: None,
    };
    send(&mut socket, &goodbye, "ctl-close").await?;
    drain(&mut socket, timeout).await;
    Ok(healthy)
}

async fn send(socket: &mut Socket, step: &Step, request_id: &str) -> CtlResult<()> {
    let mut envelope = serde_json::json!({
        "action": step.action,
        "requestID": request_id,
    });
    if let Some(payload) = &step.payload {
        envelope["payload"] = payload.clone();
    }
    socket
        .send(Message::Text(serde_json::to_string(&envelope)?))
        .await?;
    Ok(())
}

/// Read until the response for `request_id` arrives, printing anything else.
async fn await_reply(socket: &mut Socket, request_id: &str, limit: Duration) -> CtlResult<Reply> {
    tokio::time::timeout(limit, read_reply(socket, request_id))
        .await
        .map_err(|_| format!("timed out waiting for a reply to '{request_id}'"))?
}

async fn read_reply(socket: &mut Socket, request_id: &str) -> CtlResult<Reply> {
    while let Some(message) = socket.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = Reply::parse(&text)?;
        if reply.request_id == request_id {
            return Ok(reply);
        }
        reply.print();
    }
    Err(format!("connection closed before a reply to '{request_id}'").into())
}

/// Print whatever the agent sends until it closes the connection.
async fn drain(socket: &mut Socket, limit: Duration) {
    let read = async {
        while let Some(Ok(message)) = socket.next().await {
            match message {
                Message::Text(text) => match Reply::parse(&text) {
                    Ok(reply) => reply.print(),
                    Err(_) => println!("{text}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    };
    if tokio::time::timeout(limit, read).await.is_err() {
        eprintln!("agent did not close the connection in time");
    }
}
