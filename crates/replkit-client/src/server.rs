//! Kernel side of the streaming protocol.
//!
//! Reads command lines, routes each command into the kernel, and writes one
//! event line per resulting event, stamped with the command's correlation id.
//! A malformed line produces a `CommandParseFailure` event and the loop keeps
//! serving; a `Quit` command stops the loop after its events are written.

use replkit_core::Kernel;
use replkit_protocols::{CommandEnvelope, CommandKind, EventEnvelope, EventKind};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Serve `kernel` over a reader/writer pair until the input closes or a
/// `Quit` command is handled.
pub async fn serve<R, W>(kernel: Kernel, reader: R, mut writer: W) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope = match CommandEnvelope::from_line(line) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("discarding malformed command line: {error}");
                let event = EventEnvelope::new(
                    salvage_id(line),
                    EventKind::CommandParseFailure {
                        line: line.to_string(),
                        message: error.to_string(),
                    },
                );
                write_line(&mut writer, &event).await?;
                continue;
            }
        };

        let correlation = envelope.id.clone();
        let quitting = matches!(envelope.kind, CommandKind::Quit);
        debug!(id = %correlation, command = envelope.kind.name(), "command received");

        let mut stream = kernel.send(envelope.into_command())?;
        while let Some(event) = stream.recv().await {
            let outbound = EventEnvelope::new(correlation.clone(), event.kind);
            write_line(&mut writer, &outbound).await?;
        }

        if quitting {
            info!("quit command handled; stopping server loop");
            break;
        }
    }
    Ok(())
}

async fn write_line<W>(writer: &mut W, event: &EventEnvelope) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let line = event.to_line()?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Best-effort extraction of the correlation id from a line that failed to
/// parse as a command, so the failure event still correlates when possible.
fn salvage_id(line: &str) -> String {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
