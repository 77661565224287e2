use std::time::Duration;

/// Errors that can occur in protocol adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Reactor-level error.
    #[error("transport error: {0}")]
    Transport(#[from] readerwire_transport::TransportError),

    /// The inbound byte stream could not be framed. The offending bytes stay
    /// queued for the connection.
    #[error("framing error: {0}")]
    Framing(#[from] readerwire_frame::FrameError),

    /// No complete message arrived within the caller's timeout.
    #[error("no message within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
