use replkit_core::KernelError;
use replkit_protocols::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Connection closed before the command completed")]
    ConnectionClosed,
}
