use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::event::{CloseCause, ConnectionId, EventHandler};

/// The operations a reactor facade exposes to the layers above it.
///
/// Implemented by [`ReactorClient`](crate::ReactorClient) and
/// [`ReactorServer`](crate::ReactorServer); the protocol adapter is generic
/// over this trait so it works the same for either role.
pub trait Endpoint: Send + Sync {
    /// Start a connection (client) or a listening socket (server) and bind
    /// `handler` to it.
    ///
    /// Returns once the registration is queued; completion is reported by an
    /// `Opened` event (client) or by accepted connections (server).
    fn open(&self, host: &str, port: u16, handler: Arc<dyn EventHandler>) -> Result<ConnectionId>;

    /// Queue `data` for sending.
    fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()>;

    /// Drain the inbound queue of `conn`.
    ///
    /// `Some(Duration::ZERO)` never blocks, `None` waits until data arrives or
    /// the connection closes, and `Some(d)` fails with a timeout after `d`.
    fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes>;

    /// Queue a close; `force` bypasses write-lock deferral.
    fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        self.close_with(conn, force, CloseCause::Clean)
    }

    /// Queue a close whose closed event reports `cause`.
    fn close_with(&self, conn: ConnectionId, force: bool, cause: CloseCause) -> Result<()>;

    fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr>;

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr>;

    /// Begin shutdown. Idempotent.
    fn request_stop(&self);
}
