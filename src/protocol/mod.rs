//! Wire types shared with the code-dock execution service.
//!
//! Two channels carry these types:
//! - the streaming channel (`<server>/ws`) carries [`Envelope`] frames inbound
//!   and [`Acknowledgement`] frames outbound;
//! - the request/response channel carries [`ExecuteRequest`] /
//!   [`ExecuteResponse`] on `POST /execute` and [`HealthStatus`] on `GET /health`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Joint name to joint value (radians for revolute joints).
pub type JointState = BTreeMap<String, f64>;

/// `type` tags used on the streaming channel.
pub mod kind {
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
    pub const JOINT_STATE: &str = "joint_state";
    pub const EXECUTION_START: &str = "execution_start";
    pub const EXECUTION_COMPLETE: &str = "execution_complete";
    pub const ERROR: &str = "error";
    pub const TEST_START: &str = "test_start";
    pub const JOINT_POSITION_CONFIRMED: &str = "joint_position_confirmed";
}

/// Inbound frame as it appears on the wire.
///
/// `data` stays untyped here; its expected shape depends on `kind` and is
/// checked by [`crate::events::parse_message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Server clock reading in seconds. Not comparable with local time.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Outbound confirmation that the client applied a joint-state update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: JointState,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Acknowledgement {
    pub fn new(data: JointState) -> Self {
        Self {
            kind: kind::JOINT_POSITION_CONFIRMED.to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Source of `main.py`.
    pub code: String,
    #[serde(default)]
    pub stdin: String,
    /// Optional pytest file run after `main.py`. Serialized as `null` when absent.
    #[serde(default)]
    pub tests: Option<String>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin: String::new(),
            tests: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }
}

/// One pytest result reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Reply of `POST /execute`.
///
/// The service answers either `{success, output, error}` or
/// `{exit_code, stdout, stderr, tests}`. [`ExecuteResponse::from_json`] folds
/// the second shape into the first so callers only read `success`,
/// `output` and `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<TestResult>,
}

impl ExecuteResponse {
    /// Parse a response body, accepting both reply shapes.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(body)?;
        let explicit_success = raw.get("success").and_then(Value::as_bool);
        let response: ExecuteResponse = serde_json::from_value(raw)?;
        Ok(response.normalized(explicit_success))
    }

    fn normalized(mut self, explicit_success: Option<bool>) -> Self {
        self.success = match explicit_success {
            Some(success) => success,
            None => self.exit_code == Some(0),
        };
        if self.output.is_none() {
            self.output = self.stdout.clone();
        }
        if self.error.is_none() {
            self.error = self
                .stderr
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .cloned();
        }
        self
    }

    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Number of reported tests that did not pass.
    pub fn failed_tests(&self) -> usize {
        self.tests.iter().filter(|t| t.status != "passed").count()
    }
}

/// Reply of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub connections: u32,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
