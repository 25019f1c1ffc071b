//! Protocol-level errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed wire line: {0}")]
    MalformedLine(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}
