//! Streaming connection management.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `backoff` | Pure reconnect delay schedule |
//! | `machine` | Lifecycle state machine driven by the session task |
//! | `transport` | Streaming transport seam |
//! | `ws` | `tokio-tungstenite` implementation of the seam |

pub mod backoff;
pub mod machine;
pub mod transport;
pub mod ws;

pub use backoff::Backoff;
pub use machine::{ConnectionMachine, Directive};
pub use transport::{Frame, StreamConnection, StreamTransport};
pub use ws::WsTransport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Close code for a deliberate, clean close.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when a close frame carries no status.
pub const NO_STATUS: u16 = 1005;
/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Observable connection state.
///
/// `status == Error` covers both a pending reconnect (`retry_in` set) and a
/// terminal failure (`exhausted` set).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failed attempts since the last successful open.
    pub attempts: u32,
    pub max_attempts: u32,
    pub exhausted: bool,
    /// Delay before the scheduled reconnect, if one is scheduled.
    pub retry_in: Option<Duration>,
}

impl ConnectionState {
    pub fn disconnected(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Why the streaming channel closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    Abnormal { code: Option<u16>, reason: String },
}

impl CloseReason {
    pub fn from_code(code: Option<u16>, reason: impl Into<String>) -> Self {
        match code {
            Some(NORMAL_CLOSE) => CloseReason::Normal,
            _ => CloseReason::Abnormal {
                code,
                reason: reason.into(),
            },
        }
    }

    /// The stream ended or failed without a close frame.
    pub fn dropped(reason: impl Into<String>) -> Self {
        CloseReason::Abnormal {
            code: Some(ABNORMAL_CLOSE),
            reason: reason.into(),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, CloseReason::Normal)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "({}): normal closure", NORMAL_CLOSE),
            CloseReason::Abnormal { code, reason } => {
                let reason = if reason.is_empty() {
                    "Unknown reason"
                } else {
                    reason.as_str()
                };
                write!(f, "({}): {}", code.unwrap_or(NO_STATUS), reason)
            }
        }
    }
}
