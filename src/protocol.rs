//! Wire protocol between a sandbox handle and the in-sandbox runner.
//!
//! The handle sends one JSON request per job:
//!
//! ```json
//! {"code": "print(1+1)", "language": "python", "stdin": ["", "3"], "timeoutMs": 2000}
//! ```
//!
//! and the runner answers with one [`ExecutionResult`] per input item, in
//! input order. `stdin` may also be a single string.

use serde::{Deserialize, Serialize};

/// Message returned with HTTP 400 when a request lacks a required field.
pub const MISSING_FIELDS_MESSAGE: &str = "no code, timeout or language specified";

/// Execution request as sent by the sandbox handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    pub stdin: Vec<String>,
    pub timeout_ms: u64,
}

/// Execution request as received by the runner.
///
/// Every field is optional so the runner can answer missing fields with its
/// own error body instead of a generic deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stdin: Option<Stdin>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A request whose required fields are all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub code: String,
    pub language: String,
    pub inputs: Vec<String>,
    pub timeout_ms: u64,
}

impl IncomingRequest {
    /// Checks the required fields.
    ///
    /// Empty code, empty language and a zero timeout count as missing. An
    /// absent `stdin` means a single run with no input.
    pub fn validate(self) -> Option<ValidRequest> {
        let code = self.code.filter(|c| !c.is_empty())?;
        let language = self.language.filter(|l| !l.is_empty())?;
        let timeout_ms = self.timeout_ms.filter(|t| *t > 0)?;
        let inputs = match self.stdin {
            Some(stdin) => stdin.into_inputs(),
            None => vec![String::new()],
        };

        Some(ValidRequest {
            code,
            language,
            inputs,
            timeout_ms,
        })
    }
}

/// The `stdin` field: one input or a list of inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Stdin {
    One(String),
    Many(Vec<String>),
}

impl Stdin {
    /// Flattens into the ordered list of inputs.
    #[must_use]
    pub fn into_inputs(self) -> Vec<String> {
        match self {
            Self::One(input) => vec![input],
            Self::Many(inputs) => inputs,
        }
    }
}

/// Captured outcome of running the code against one input item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// stdout and stderr interleaved in arrival order.
    #[serde(default)]
    pub combined: String,
    /// True when the process exited non-zero or timed out.
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
    /// Set by the runner when it killed the process itself.
    #[serde(default, skip_serializing_if = "is_false")]
    pub killed_by_container: bool,
}

impl ExecutionResult {
    /// Result reported when the request to the runner hit its deadline.
    ///
    /// Nothing was captured because the response never arrived.
    #[must_use]
    pub fn transport_timeout() -> Self {
        Self {
            timed_out: true,
            is_error: true,
            ..Self::default()
        }
    }
}

/// Body of a runner error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}
