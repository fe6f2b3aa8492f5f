//! `EXECUTE_EXPERIMENT` payload decoding.

use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Validated workload for one stress process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressParameters {
    /// Number of CPU stressor workers; always positive.
    pub workers: u32,
    /// Target load per worker, in percent (0–100).
    pub load: u8,
    /// Run time after which the tool stops on its own; whole seconds.
    pub timeout: Duration,
}

/// Field value as sent by clients: string-encoded, or a bare JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Field {
    Text(String),
    Number(serde_json::Number),
}

impl Field {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    #[serde(rename = "Workers", alias = "workers")]
    workers: Field,
    #[serde(rename = "Load", alias = "load")]
    load: Field,
    #[serde(rename = "Timeout", alias = "timeout")]
    timeout: Field,
}

impl StressParameters {
    /// Decode and validate an `EXECUTE_EXPERIMENT` payload.
    ///
    /// Expects `{"Workers": "2", "Load": "50", "Timeout": "60"}`; numeric
    /// JSON values are accepted in place of strings, and `Timeout` may carry
    /// an `s` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] if the payload is empty, is not the
    /// expected object, or any field is out of range.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(AppError::Decode("missing experiment parameters".into()));
        }

        let raw: RawParameters = serde_json::from_slice(payload)
            .map_err(|err| AppError::Decode(format!("invalid experiment parameters: {err}")))?;

        let params = Self {
            workers: parse_workers(&raw.workers.into_text())?,
            load: parse_load(&raw.load.into_text())?,
            timeout: parse_timeout(&raw.timeout.into_text())?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameter invariants.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Decode("Workers must be greater than zero".into()));
        }
        if self.load > 100 {
            return Err(AppError::Decode(format!(
                "Load must be between 0 and 100, got {}",
                self.load
            )));
        }
        if self.timeout.as_secs() == 0 {
            return Err(AppError::Decode(
                "Timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

fn parse_workers(raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|err| AppError::Decode(format!("invalid Workers '{raw}': {err}")))
}

fn parse_load(raw: &str) -> Result<u8> {
    raw.trim()
        .trim_end_matches('%')
        .parse::<u8>()
        .map_err(|err| AppError::Decode(format!("invalid Load '{raw}': {err}")))
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    let seconds = trimmed.strip_suffix('s').unwrap_or(trimmed);
    seconds
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|err| AppError::Decode(format!("invalid Timeout '{raw}': {err}")))
}
