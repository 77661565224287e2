use std::net::SocketAddr;
use std::time::Duration;

use crate::event::ConnectionId;

/// Errors that can occur in reactor operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection or listening socket is not registered with the reactor.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The reactor has begun shutting down and accepts no further changes.
    #[error("reactor service stopped")]
    ServiceStopped,

    /// A bounded wait elapsed without the awaited condition.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation needs a connection but the id names a listening socket.
    #[error("{0} is a listening socket, not a connection")]
    NotAStream(ConnectionId),

    /// Host name resolution failed or produced no address.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Failed to bind a listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to start a connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred while setting up the reactor.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
