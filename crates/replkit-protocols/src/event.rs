//! Event definitions.
//!
//! Events are append-only observations produced while handling commands.
//! Every event except kernel status changes and wire parse failures carries
//! the command that caused it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;

/// A single completion suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    /// Text shown in the completion list.
    pub display_text: String,
    /// Text inserted when the item is accepted.
    pub insert_text: String,
}

/// The kind of occurrence an event reports, with its kind-specific payload.
///
/// Serialized adjacently tagged so the wire form is
/// `{"eventType": "...", "event": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "event", rename_all_fields = "camelCase")]
pub enum EventKind {
    /// A code submission reached the kernel.
    CodeSubmissionReceived { code: String },

    /// The submission parsed as complete and will be executed.
    CompleteCodeSubmissionReceived { code: String },

    /// The submission is syntactically incomplete; execution was skipped.
    IncompleteCodeSubmissionReceived { code: String },

    /// Evaluation produced a return value.
    ReturnValueProduced { value: Value },

    /// A value was displayed without being the submission's return value.
    DisplayedValueProduced { value: Value },

    /// A previously displayed value was updated in place.
    DisplayedValueUpdated { value: Value, value_id: String },

    /// Text written to standard output during execution.
    StandardOutputValueProduced { value: String },

    /// Text written to standard error during execution.
    StandardErrorValueProduced { value: String },

    /// Completion items for a `RequestCompletion` command.
    CompletionProduced { completions: Vec<CompletionItem> },

    /// Signatures for a `RequestSignatureHelp` command.
    SignatureHelpProduced { signatures: Vec<String> },

    /// Terminal event: the root command completed successfully.
    CommandHandled,

    /// Terminal event: the root command failed.
    CommandFailed { message: String },

    /// The kernel started handling a command.
    KernelBusy,

    /// The kernel finished handling a command and is waiting.
    KernelIdle,

    /// A package reference was resolved into the environment.
    PackageAdded { name: String, version: String },

    /// An extension was loaded and initialized.
    ExtensionLoaded { path: PathBuf },

    /// An extension failed to load or initialize.
    ExtensionLoadFailed { path: PathBuf, message: String },

    /// An inbound wire line could not be parsed into a command.
    CommandParseFailure { line: String, message: String },
}

impl EventKind {
    /// Stable name of the event kind, as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CodeSubmissionReceived { .. } => "CodeSubmissionReceived",
            EventKind::CompleteCodeSubmissionReceived { .. } => "CompleteCodeSubmissionReceived",
            EventKind::IncompleteCodeSubmissionReceived { .. } => {
                "IncompleteCodeSubmissionReceived"
            }
            EventKind::ReturnValueProduced { .. } => "ReturnValueProduced",
            EventKind::DisplayedValueProduced { .. } => "DisplayedValueProduced",
            EventKind::DisplayedValueUpdated { .. } => "DisplayedValueUpdated",
            EventKind::StandardOutputValueProduced { .. } => "StandardOutputValueProduced",
            EventKind::StandardErrorValueProduced { .. } => "StandardErrorValueProduced",
            EventKind::CompletionProduced { .. } => "CompletionProduced",
            EventKind::SignatureHelpProduced { .. } => "SignatureHelpProduced",
            EventKind::CommandHandled => "CommandHandled",
            EventKind::CommandFailed { .. } => "CommandFailed",
            EventKind::KernelBusy => "KernelBusy",
            EventKind::KernelIdle => "KernelIdle",
            EventKind::PackageAdded { .. } => "PackageAdded",
            EventKind::ExtensionLoaded { .. } => "ExtensionLoaded",
            EventKind::ExtensionLoadFailed { .. } => "ExtensionLoadFailed",
            EventKind::CommandParseFailure { .. } => "CommandParseFailure",
        }
    }

    /// Whether this kind ends a root command's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::CommandHandled | EventKind::CommandFailed { .. }
        )
    }
}

/// An observable occurrence, tied to the command that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The causing command. `None` only for kernel status events
    /// ([`EventKind::KernelBusy`] / [`EventKind::KernelIdle`]) and for
    /// [`EventKind::CommandParseFailure`], where no command was constructed.
    pub command: Option<Command>,

    /// What happened.
    pub kind: EventKind,
}

impl Event {
    /// Create an event caused by `command`.
    pub fn new(kind: EventKind, command: Command) -> Self {
        Self {
            command: Some(command),
            kind,
        }
    }

    /// Create an event with no causing command.
    pub fn unscoped(kind: EventKind) -> Self {
        Self {
            command: None,
            kind,
        }
    }

    /// Identity of the causing command, if any.
    pub fn command_id(&self) -> Option<uuid::Uuid> {
        self.command.as_ref().map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::CommandHandled.is_terminal());
        assert!(EventKind::CommandFailed {
            message: "boom".to_string()
        }
        .is_terminal());
        assert!(!EventKind::KernelIdle.is_terminal());
        assert!(!EventKind::ReturnValueProduced { value: json!(1) }.is_terminal());
    }

    #[test]
    fn test_event_carries_causing_command() {
        let cmd = Command::submit_code("123");
        let event = Event::new(EventKind::ReturnValueProduced { value: json!(123) }, cmd.clone());
        assert_eq!(event.command_id(), Some(cmd.id));
    }

    #[test]
    fn test_unscoped_event_has_no_command() {
        let event = Event::unscoped(EventKind::KernelBusy);
        assert!(event.command_id().is_none());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::KernelIdle.name(), "KernelIdle");
        assert_eq!(
            EventKind::CommandFailed {
                message: String::new()
            }
            .name(),
            "CommandFailed"
        );
    }
}
