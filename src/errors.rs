//! Typed error hierarchy for the bridge.
//!
//! Four enums cover the four failure domains:
//! - `ConnectionError`: streaming channel (WebSocket) failures and refused transitions
//! - `ProtocolError`: inbound frames that cannot be turned into events
//! - `RunError`: `submit_run` failures surfaced to the caller
//! - `ConfigError`: invalid configuration values

use thiserror::Error;

/// Errors from the streaming channel and the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Timed out connecting to {url} after {secs}s")]
    ConnectTimeout { url: String, secs: u64 },

    #[error("WebSocket handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },

    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("A connection attempt is already in flight")]
    AttemptInFlight,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("A reconnect is already scheduled")]
    ReconnectPending,

    #[error("No reconnect is scheduled")]
    NoReconnectScheduled,

    #[error("Reconnect attempts exhausted")]
    RetriesExhausted,
}

/// Errors raised while decoding an inbound frame.
///
/// Neither variant is fatal: the session records the problem and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    #[error("Malformed message ({reason}): {raw}")]
    Malformed { reason: String, raw: String },
}

/// Failed outcomes of `submit_run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("Not connected to robot server")]
    NotConnected,

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Execution request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Session closed before the run finished")]
    Abandoned,
}

/// Errors from resolving configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}
