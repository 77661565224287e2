use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;

/// Identifies a listening socket or connection for the lifetime of a reactor.
///
/// Ids are never reused, so a stale id can only ever name a closed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    /// Rebuild an id from [`as_u64`](Self::as_u64). Ids a reactor never
    /// issued are reported as unknown by every operation.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a connection or listening socket was closed.
#[derive(Debug, Clone)]
pub enum CloseCause {
    /// Closed on request or during an orderly shutdown.
    Clean,
    /// The remote end closed or reset the connection.
    RemoteReset,
    /// A socket operation failed.
    Io(Arc<io::Error>),
    /// The protocol layer gave up on the byte stream.
    Protocol(String),
}

impl CloseCause {
    pub fn io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::RemoteReset,
            _ => Self::Io(Arc::new(err)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_))
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::RemoteReset => f.write_str("remote reset"),
            Self::Io(err) => write!(f, "i/o failure: {err}"),
            Self::Protocol(detail) => write!(f, "protocol failure: {detail}"),
        }
    }
}

/// Final notification for a connection or listening socket.
///
/// Carries everything that was still queued so nothing is silently dropped.
#[derive(Debug, Clone)]
pub struct ClosedEvent {
    pub conn: ConnectionId,
    /// Owning listening socket for server-accepted connections.
    pub listener: Option<ConnectionId>,
    /// Outbound bytes that never reached the socket.
    pub pending_send: Bytes,
    /// Inbound bytes nobody consumed.
    pub pending_received: Bytes,
    pub cause: CloseCause,
}

/// Lifecycle and data notifications produced by the reactor thread.
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection completed connect or was accepted.
    Opened {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
    },
    /// One queued chunk was written completely.
    Sent {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        data: Bytes,
    },
    /// New inbound bytes are waiting in the connection's queue.
    Received {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
    },
    Closed(ClosedEvent),
}

impl Event {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Self::Opened { conn, .. } | Self::Sent { conn, .. } | Self::Received { conn, .. } => {
                *conn
            }
            Self::Closed(closed) => closed.conn,
        }
    }

    pub fn listener(&self) -> Option<ConnectionId> {
        match self {
            Self::Opened { listener, .. }
            | Self::Sent { listener, .. }
            | Self::Received { listener, .. } => *listener,
            Self::Closed(closed) => closed.listener,
        }
    }
}

/// Receives reactor events. Called on the reactor thread, so implementations
/// must not block on the reactor they are attached to.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync,
{
    fn handle(&self, event: Event) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_kinds_map_to_remote_reset() {
        let cause = CloseCause::io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(cause, CloseCause::RemoteReset));
        assert!(!cause.is_error());

        let cause = CloseCause::io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(cause, CloseCause::Io(_)));
        assert!(cause.is_error());
    }

    #[test]
    fn event_accessors() {
        let event = Event::Received {
            conn: ConnectionId(4),
            listener: Some(ConnectionId(1)),
        };
        assert_eq!(event.conn(), ConnectionId(4));
        assert_eq!(event.listener(), Some(ConnectionId(1)));
        assert_eq!(ConnectionId(4).to_string(), "conn#4");
    }
}
