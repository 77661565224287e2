use bytes::Bytes;
use readerwire_frame::FrameError;
use readerwire_transport::{CloseCause, ConnectionId};

/// Reactor events as seen through the protocol adapter.
#[derive(Debug)]
pub enum ProtocolEvent<M> {
    Opened {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
    },
    /// One encoded message (or raw chunk) was written completely.
    Sent {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        data: Bytes,
    },
    /// Raw bytes are queued for `await_message` (await delivery only).
    DataReceived {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
    },
    /// A complete message was framed (event delivery only).
    MessageReceived {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        message: M,
    },
    /// Framing stopped on malformed input (event delivery only). The bytes
    /// remain queued and are reported again on close.
    FramingFailed {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        error: FrameError,
    },
    /// Terminal event. `pending_received` holds partially framed bytes,
    /// then unconsumed raw bytes, then bytes never taken from the reactor.
    Closed {
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        pending_send: Bytes,
        pending_received: Bytes,
        cause: CloseCause,
    },
}

impl<M> ProtocolEvent<M> {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Self::Opened { conn, .. }
            | Self::Sent { conn, .. }
            | Self::DataReceived { conn, .. }
            | Self::MessageReceived { conn, .. }
            | Self::FramingFailed { conn, .. }
            | Self::Closed { conn, .. } => *conn,
        }
    }

    pub fn listener(&self) -> Option<ConnectionId> {
        match self {
            Self::Opened { listener, .. }
            | Self::Sent { listener, .. }
            | Self::DataReceived { listener, .. }
            | Self::MessageReceived { listener, .. }
            | Self::FramingFailed { listener, .. }
            | Self::Closed { listener, .. } => *listener,
        }
    }
}

/// Receives protocol events on the reactor thread.
pub trait ProtocolHandler<M>: Send + Sync {
    fn handle(&self, event: ProtocolEvent<M>);
}

impl<M, F> ProtocolHandler<M> for F
where
    F: Fn(ProtocolEvent<M>) + Send + Sync,
{
    fn handle(&self, event: ProtocolEvent<M>) {
        self(event)
    }
}
