//! Caller side of the streaming protocol.

use replkit_protocols::{CommandEnvelope, CommandKind, EventEnvelope};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::debug;

use crate::error::ClientError;

/// Writes command lines and collects each command's event lines.
pub struct KernelClient<R, W> {
    lines: Lines<R>,
    writer: W,
    next_id: u64,
}

impl<R, W> KernelClient<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: reader.lines(),
            writer,
            next_id: 1,
        }
    }

    /// Send a command and collect its events, ending with the terminal event.
    pub async fn submit(&mut self, kind: CommandKind) -> Result<Vec<EventEnvelope>, ClientError> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.submit_envelope(CommandEnvelope::new(id, kind)).await
    }

    /// Send a command targeted at a named kernel.
    pub async fn submit_to(
        &mut self,
        kernel_name: impl Into<String>,
        kind: CommandKind,
    ) -> Result<Vec<EventEnvelope>, ClientError> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let mut envelope = CommandEnvelope::new(id, kind);
        envelope.target_kernel = Some(kernel_name.into());
        self.submit_envelope(envelope).await
    }

    async fn submit_envelope(
        &mut self,
        envelope: CommandEnvelope,
    ) -> Result<Vec<EventEnvelope>, ClientError> {
        let correlation = envelope.id.clone();
        let line = envelope.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut events = Vec::new();
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event = EventEnvelope::from_line(&line)?;
            // Trailing status events of an earlier command may still be in
            // the pipe; correlation ids keep them apart.
            if event.id != correlation {
                debug!(id = %event.id, "skipping event from another command");
                continue;
            }
            let terminal = event.kind.is_terminal();
            events.push(event);
            if terminal {
                return Ok(events);
            }
        }
        Err(ClientError::ConnectionClosed)
    }
}
