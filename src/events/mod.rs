//! Inbound event parser.
//!
//! Turns one raw streaming-channel frame into exactly one [`InboundEvent`],
//! or a [`ProtocolError`] the session records and moves past.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::protocol::{Envelope, JointState, kind};

/// Payload of an inbound event, one variant per wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Stdout(String),
    Stderr(String),
    /// `joint_state`: a partial or complete joint mapping.
    Telemetry(JointState),
    /// `execution_start`
    RunStarted(String),
    /// `execution_complete`
    RunCompleted(String),
    Error(String),
    /// `test_start`
    TestStarted(String),
    /// `joint_position_confirmed`: the service echoing an acknowledgement.
    Confirmed(JointState),
}

impl EventKind {
    /// Wire tag for this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::Stdout(_) => kind::STDOUT,
            EventKind::Stderr(_) => kind::STDERR,
            EventKind::Telemetry(_) => kind::JOINT_STATE,
            EventKind::RunStarted(_) => kind::EXECUTION_START,
            EventKind::RunCompleted(_) => kind::EXECUTION_COMPLETE,
            EventKind::Error(_) => kind::ERROR,
            EventKind::TestStarted(_) => kind::TEST_START,
            EventKind::Confirmed(_) => kind::JOINT_POSITION_CONFIRMED,
        }
    }

    /// True for events that drive run bookkeeping.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::RunStarted(_) | EventKind::RunCompleted(_) | EventKind::Error(_)
        )
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// Server-side timestamp, when the frame carried one.
    pub server_timestamp: Option<f64>,
    pub received_at: DateTime<Utc>,
}

/// Decode one raw frame.
///
/// Unknown `type` values yield [`ProtocolError::UnknownType`]; invalid JSON or
/// a payload of the wrong shape for its type yields [`ProtocolError::Malformed`].
pub fn parse_message(raw: &str) -> Result<InboundEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(|e| malformed(e.to_string(), raw))?;

    let kind = match envelope.kind.as_str() {
        kind::STDOUT => EventKind::Stdout(required_text(&envelope.data, raw)?),
        kind::STDERR => EventKind::Stderr(required_text(&envelope.data, raw)?),
        kind::JOINT_STATE => EventKind::Telemetry(joint_mapping(&envelope.data, raw)?),
        kind::EXECUTION_START => EventKind::RunStarted(lifecycle_text(&envelope.data, raw)?),
        kind::EXECUTION_COMPLETE => EventKind::RunCompleted(lifecycle_text(&envelope.data, raw)?),
        kind::ERROR => EventKind::Error(lifecycle_text(&envelope.data, raw)?),
        kind::TEST_START => EventKind::TestStarted(lifecycle_text(&envelope.data, raw)?),
        kind::JOINT_POSITION_CONFIRMED => EventKind::Confirmed(joint_mapping(&envelope.data, raw)?),
        other => return Err(ProtocolError::UnknownType(other.to_string())),
    };

    Ok(InboundEvent {
        kind,
        server_timestamp: envelope.timestamp,
        received_at: Utc::now(),
    })
}

fn malformed(reason: impl Into<String>, raw: &str) -> ProtocolError {
    ProtocolError::Malformed {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

fn required_text(data: &Value, raw: &str) -> Result<String, ProtocolError> {
    data.as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed("expected string data", raw))
}

/// Lifecycle markers tolerate a missing payload so a bare
/// `{"type":"execution_complete"}` still ends the run.
fn lifecycle_text(data: &Value, raw: &str) -> Result<String, ProtocolError> {
    match data {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        _ => Err(malformed("expected string data", raw)),
    }
}

fn joint_mapping(data: &Value, raw: &str) -> Result<JointState, ProtocolError> {
    let object = data
        .as_object()
        .ok_or_else(|| malformed("expected joint mapping", raw))?;

    let mut joints = JointState::new();
    for (name, value) in object {
        let value = value
            .as_f64()
            .ok_or_else(|| malformed(format!("joint '{}' is not a number", name), raw))?;
        joints.insert(name.clone(), value);
    }
    Ok(joints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stdout() {
        let event = parse_message(r#"{"type":"stdout","data":"1","timestamp":12.5}"#).unwrap();
        assert_eq!(event.kind, EventKind::Stdout("1".to_string()));
        assert_eq!(event.server_timestamp, Some(12.5));
    }

    #[test]
    fn test_parse_joint_state() {
        let event = parse_message(
            r#"{"type":"joint_state","data":{"base_to_shoulder":0.5,"wrist_to_gripper":-1},"timestamp":1.0}"#,
        )
        .unwrap();
        match event.kind {
            EventKind::Telemetry(joints) => {
                assert_eq!(joints.len(), 2);
                assert_eq!(joints["base_to_shoulder"], 0.5);
                assert_eq!(joints["wrist_to_gripper"], -1.0);
            }
            other => panic!("Expected Telemetry, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_lifecycle_events() {
        let start = parse_message(r#"{"type":"execution_start","data":"Starting Python execution..."}"#)
            .unwrap();
        assert!(start.kind.is_lifecycle());
        assert_eq!(start.kind.tag(), "execution_start");

        let done = parse_message(r#"{"type":"execution_complete"}"#).unwrap();
        assert_eq!(done.kind, EventKind::RunCompleted(String::new()));

        let err = parse_message(r#"{"type":"error","data":"Execution timed out"}"#).unwrap();
        assert_eq!(err.kind, EventKind::Error("Execution timed out".to_string()));
    }

    #[test]
    fn test_parse_test_start() {
        let event = parse_message(r#"{"type":"test_start","data":"Running tests..."}"#).unwrap();
        assert_eq!(event.kind, EventKind::TestStarted("Running tests...".to_string()));
        assert!(!event.kind.is_lifecycle());
    }

    #[test]
    fn test_parse_confirmation_echo() {
        let event =
            parse_message(r#"{"type":"joint_position_confirmed","data":{"a":0.5},"timestamp":3.0}"#)
                .unwrap();
        assert_eq!(event.kind.tag(), "joint_position_confirmed");
        assert!(matches!(event.kind, EventKind::Confirmed(ref j) if j["a"] == 0.5));
    }

    #[test]
    fn test_unknown_type_is_reported_not_fatal() {
        let err = parse_message(r#"{"type":"robot_dance","data":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("robot_dance".to_string()));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = parse_message("Server received: hello").unwrap_err();
        match err {
            ProtocolError::Malformed { raw, .. } => assert_eq!(raw, "Server received: hello"),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_payload_shape_is_malformed() {
        assert!(matches!(
            parse_message(r#"{"type":"stdout","data":{"a":1}}"#),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            parse_message(r#"{"type":"joint_state","data":"a=1"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            parse_message(r#"{"type":"joint_state","data":{"a":"fast"}}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_type_is_malformed() {
        assert!(matches!(
            parse_message(r#"{"data":"orphan"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }
}
