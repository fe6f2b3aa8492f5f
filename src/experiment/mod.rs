//! CPU stress experiment lifecycle.
//!
//! - `params`: `EXECUTE_EXPERIMENT` payload decoding and validation.
//! - `stress`: stress tool command line and steady-state check.
//! - `process`: [`ProcessHandle`] and mutex-guarded output capture.
//! - `monitor`: background task that reaps the process and reports completion.
//! - `controller`: start / liveness / revert / abort operations.

pub mod controller;
pub mod monitor;
pub mod params;
pub mod process;
pub mod stress;

pub use controller::ExperimentController;
pub use params::StressParameters;
pub use process::{ExitReport, ProcessHandle, ProcessState};
