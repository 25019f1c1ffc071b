//! Language engine seam.
//!
//! A [`LanguageEngine`] is the stateful evaluation backend of one kernel:
//! the piece that actually runs code once directives have been dispatched.
//! Engines keep their own state across submissions on one kernel instance.

use std::sync::Arc;

use async_trait::async_trait;
use replkit_protocols::{Command, CompletionItem, EventKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::InvocationContext;

/// Handle an engine uses to publish output while executing.
pub struct ExecutionOutput {
    ctx: Arc<InvocationContext>,
    command: Command,
}

impl ExecutionOutput {
    pub(crate) fn new(ctx: Arc<InvocationContext>, command: Command) -> Self {
        Self { ctx, command }
    }

    /// Publish text written to standard output.
    pub fn stdout(&self, text: impl Into<String>) {
        self.ctx.publish(
            EventKind::StandardOutputValueProduced { value: text.into() },
            &self.command,
        );
    }

    /// Publish text written to standard error.
    pub fn stderr(&self, text: impl Into<String>) {
        self.ctx.publish(
            EventKind::StandardErrorValueProduced { value: text.into() },
            &self.command,
        );
    }

    /// Display a value without making it the submission's return value.
    pub fn display(&self, value: Value) {
        self.ctx
            .publish(EventKind::DisplayedValueProduced { value }, &self.command);
    }

    /// Update a previously displayed value in place.
    pub fn update_display(&self, value: Value, value_id: impl Into<String>) {
        self.ctx.publish(
            EventKind::DisplayedValueUpdated {
                value,
                value_id: value_id.into(),
            },
            &self.command,
        );
    }

    /// Token cancelled when the command is cancelled; long-running engines
    /// must observe it at their suspension points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancellation_token()
    }
}

/// Stateful evaluation backend of a kernel.
#[async_trait]
pub trait LanguageEngine: Send + 'static {
    /// Whether `code` is a complete submission ready to execute. Incomplete
    /// submissions are acknowledged but not executed.
    fn is_complete(&self, _code: &str) -> bool {
        true
    }

    /// Execute a complete submission, returning its value if it has one.
    /// Errors are user-level failures; the kernel converts them into a
    /// `CommandFailed` event rather than propagating.
    async fn execute(
        &mut self,
        code: &str,
        output: &ExecutionOutput,
    ) -> Result<Option<Value>, anyhow::Error>;

    /// Completion items at a cursor position.
    async fn completions(&mut self, _code: &str, _cursor: usize) -> Vec<CompletionItem> {
        Vec::new()
    }

    /// Signature help at a cursor position.
    async fn signature_help(&mut self, _code: &str, _cursor: usize) -> Vec<String> {
        Vec::new()
    }
}
