//! Command definitions.
//!
//! A [`Command`] is the unit of work exchanged between callers and kernels.
//! Commands are immutable after creation; a command spawned by the handling
//! of another command carries the parent's identity in `parent_id`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of work a command requests, with its kind-specific payload.
///
/// Serialized adjacently tagged so the wire form is
/// `{"commandType": "...", "command": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "command", rename_all_fields = "camelCase")]
pub enum CommandKind {
    /// Submit code for execution.
    SubmitCode { code: String },

    /// Request completion items at a cursor position.
    RequestCompletion { code: String, cursor_position: usize },

    /// Request signature help at a cursor position.
    RequestSignatureHelp { code: String, cursor_position: usize },

    /// Cancel whatever command is presently in flight on the kernel.
    CancelCurrentCommand,

    /// Load kernel extensions discovered under a directory.
    LoadExtensionsInDirectory { directory: PathBuf },

    /// Add a package reference and restore it into the environment.
    AddPackage {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Terminate the serving loop after this command completes.
    Quit,
}

impl CommandKind {
    /// Stable name of the command kind, as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SubmitCode { .. } => "SubmitCode",
            CommandKind::RequestCompletion { .. } => "RequestCompletion",
            CommandKind::RequestSignatureHelp { .. } => "RequestSignatureHelp",
            CommandKind::CancelCurrentCommand => "CancelCurrentCommand",
            CommandKind::LoadExtensionsInDirectory { .. } => "LoadExtensionsInDirectory",
            CommandKind::AddPackage { .. } => "AddPackage",
            CommandKind::Quit => "Quit",
        }
    }
}

/// A command submitted to a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique identity of this command.
    pub id: Uuid,

    /// Identity of the command whose handling spawned this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// Explicit target kernel name, if the caller chose one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kernel: Option<String>,

    /// The kind of work requested.
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    /// Create a new root command.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            target_kernel: None,
            kind,
        }
    }

    /// Create a `SubmitCode` command.
    pub fn submit_code(code: impl Into<String>) -> Self {
        Self::new(CommandKind::SubmitCode { code: code.into() })
    }

    /// Create a command spawned by the handling of `parent`.
    pub fn nested(kind: CommandKind, parent: &Command) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(parent.id),
            target_kernel: None,
            kind,
        }
    }

    /// Set the explicit target kernel name.
    pub fn with_target(mut self, kernel_name: impl Into<String>) -> Self {
        self.target_kernel = Some(kernel_name.into());
        self
    }

    /// Derive a command with the same identity but different payload.
    ///
    /// Used when a routing layer consumes part of a submission (a directive
    /// line) and forwards the remainder as the same logical command.
    pub fn derive(&self, kind: CommandKind) -> Self {
        Self {
            id: self.id,
            parent_id: self.parent_id,
            target_kernel: None,
            kind,
        }
    }

    /// The submitted code, for kinds that carry one.
    pub fn code(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::SubmitCode { code }
            | CommandKind::RequestCompletion { code, .. }
            | CommandKind::RequestSignatureHelp { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_command_has_no_parent() {
        let cmd = Command::submit_code("123");
        assert!(cmd.parent_id.is_none());
        assert!(cmd.target_kernel.is_none());
        assert_eq!(cmd.code(), Some("123"));
    }

    #[test]
    fn test_nested_command_carries_parent_id() {
        let parent = Command::submit_code("#time\n123");
        let nested = Command::nested(
            CommandKind::SubmitCode {
                code: "123".to_string(),
            },
            &parent,
        );
        assert_eq!(nested.parent_id, Some(parent.id));
        assert_ne!(nested.id, parent.id);
    }

    #[test]
    fn test_derive_keeps_identity() {
        let cmd = Command::submit_code("#kernel calc\n1 + 1").with_target("router");
        let derived = cmd.derive(CommandKind::SubmitCode {
            code: "1 + 1".to_string(),
        });
        assert_eq!(derived.id, cmd.id);
        assert_eq!(derived.code(), Some("1 + 1"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Command::submit_code("x").kind.name(), "SubmitCode");
        assert_eq!(
            Command::new(CommandKind::CancelCurrentCommand).kind.name(),
            "CancelCurrentCommand"
        );
    }
}
