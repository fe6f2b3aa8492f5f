#![forbid(unsafe_code)]

//! `m-agent` — remote chaos agent that drives CPU stress experiments.
//!
//! Clients connect over a WebSocket, issue control actions (steady-state
//! check, start, liveness, probe, revert, abort, close), and receive
//! synchronous responses plus an asynchronous completion report when the
//! stress process finishes.

pub mod config;
pub mod errors;
pub mod experiment;
pub mod probe;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
