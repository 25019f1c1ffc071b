//! Wire envelopes for the line-delimited streaming protocol.
//!
//! One JSON object per line. Inbound lines carry
//! `{"id": ..., "commandType": ..., "command": ...}`; outbound lines carry
//! `{"id": ..., "eventType": ..., "event": ...}`. The `id` correlates a
//! request to every event it causes, including events of nested commands.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind};
use crate::error::ProtocolError;
use crate::event::EventKind;

/// An inbound command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Caller-chosen correlation id, echoed on every resulting event.
    pub id: String,

    /// Explicit target kernel name, if the caller chose one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kernel: Option<String>,

    #[serde(flatten)]
    pub kind: CommandKind,
}

impl CommandEnvelope {
    /// Create an envelope for sending `kind` under correlation `id`.
    pub fn new(id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: id.into(),
            target_kernel: None,
            kind,
        }
    }

    /// Parse one wire line.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedLine(e.to_string()))
    }

    /// Serialize to one wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Build the internal command this envelope describes.
    pub fn into_command(self) -> Command {
        let mut command = Command::new(self.kind);
        command.target_kernel = self.target_kernel;
        command
    }
}

/// An outbound event line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Correlation id of the command that caused this event.
    pub id: String,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventEnvelope {
    /// Create an envelope for an event under correlation `id`.
    pub fn new(id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Parse one wire line.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedLine(e.to_string()))
    }

    /// Serialize to one wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_envelope_round_trip() {
        let envelope = CommandEnvelope::new(
            "42",
            CommandKind::SubmitCode {
                code: "var x = 1;".to_string(),
            },
        );
        let line = envelope.to_line().unwrap();
        let parsed = CommandEnvelope::from_line(&line).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_command_envelope_wire_shape() {
        let envelope = CommandEnvelope::new(
            "1",
            CommandKind::SubmitCode {
                code: "123".to_string(),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&envelope.to_line().unwrap()).unwrap();
        assert_eq!(value["id"], json!("1"));
        assert_eq!(value["commandType"], json!("SubmitCode"));
        assert_eq!(value["command"]["code"], json!("123"));
    }

    #[test]
    fn test_unit_command_omits_payload() {
        let envelope = CommandEnvelope::new("q", CommandKind::Quit);
        let line = envelope.to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["commandType"], json!("Quit"));
        let parsed = CommandEnvelope::from_line(&line).unwrap();
        assert_eq!(parsed.kind, CommandKind::Quit);
    }

    #[test]
    fn test_into_command_preserves_kind_and_target() {
        let mut envelope = CommandEnvelope::new(
            "7",
            CommandKind::RequestCompletion {
                code: "pri".to_string(),
                cursor_position: 3,
            },
        );
        envelope.target_kernel = Some("calc".to_string());
        let command = envelope.clone().into_command();
        assert_eq!(command.kind, envelope.kind);
        assert_eq!(command.target_kernel.as_deref(), Some("calc"));
    }

    #[test]
    fn test_event_envelope_wire_shape() {
        let envelope = EventEnvelope::new("1", EventKind::ReturnValueProduced { value: json!(123) });
        let value: serde_json::Value = serde_json::from_str(&envelope.to_line().unwrap()).unwrap();
        assert_eq!(value["id"], json!("1"));
        assert_eq!(value["eventType"], json!("ReturnValueProduced"));
        assert_eq!(value["event"]["value"], json!(123));
    }

    #[test]
    fn test_malformed_line_is_reported_not_panicked() {
        let result = CommandEnvelope::from_line("{not json");
        assert!(matches!(result, Err(ProtocolError::MalformedLine(_))));
    }
}
