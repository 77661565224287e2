use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::config::ReactorConfig;
use crate::dispatch::Facade;
use crate::error::{Result, TransportError};
use crate::event::{CloseCause, ConnectionId, EventHandler};
use crate::socket;
use crate::traits::Endpoint;

/// Client role: outbound connections driven by one reactor thread.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use readerwire_transport::{Event, ReactorClient, ReactorConfig};
///
/// # fn main() -> readerwire_transport::Result<()> {
/// let client = ReactorClient::new(ReactorConfig::default())?;
/// let conn = client.connect("127.0.0.1", 4100, std::sync::Arc::new(|event: Event| {
///     println!("{event:?}");
/// }))?;
/// client.send(conn, bytes::Bytes::from_static(&[1, 2, 3, 4]))?;
/// let reply = client.await_data(conn, Some(Duration::from_secs(1)))?;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReactorClient {
    facade: Facade,
}

impl ReactorClient {
    /// Spawn the reactor thread for this client.
    pub fn new(config: ReactorConfig) -> Result<Self> {
        Ok(Self {
            facade: Facade::spawn(config)?,
        })
    }

    /// Start a non-blocking connect to `host:port`.
    ///
    /// The connection is usable for `send` immediately; bytes are flushed once
    /// the connect completes.
    pub fn open(
        &self,
        host: &str,
        port: u16,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ConnectionId> {
        let addr = socket::resolve(host, port)?;
        let stream = socket::connect(addr)?;
        let id = self
            .facade
            .register_with(handler, |reactor, id| reactor.register_stream(id, stream))?;
        debug!(conn = %id, %addr, "connection opening");
        Ok(id)
    }

    /// [`open`](Self::open), then wait up to the configured open timeout
    /// for the connect to complete.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ConnectionId> {
        let id = self.open(host, port, handler)?;
        let timeout = self.facade.reactor.config().open_timeout;
        match self.facade.reactor.await_opened(id, timeout) {
            Ok(()) => Ok(id),
            Err(err @ TransportError::Timeout(_)) => {
                // Best effort; the connection may already be gone.
                let _ = self.facade.close(id, true);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        self.facade.send(conn, data)
    }

    pub fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        self.facade.await_data(conn, timeout)
    }

    pub fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        self.facade.close(conn, force)
    }

    /// Close `conn`, reporting `cause` on its closed event.
    pub fn close_with(&self, conn: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        self.facade.close_with(conn, force, cause)
    }

    /// Close and wait up to the configured close timeout.
    pub fn close_and_wait(&self, conn: ConnectionId, force: bool) -> Result<()> {
        self.facade.close_and_wait(conn, force)
    }

    pub fn local_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.facade.local_addr(conn)
    }

    pub fn peer_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.facade.peer_addr(conn)
    }

    pub fn request_stop(&self) {
        self.facade.reactor.request_stop();
    }

    /// Stop the reactor and wait for its thread to exit.
    pub fn shutdown(&self) {
        self.facade.reactor.request_stop();
        self.facade.reactor.join();
    }
}

impl Endpoint for ReactorClient {
    fn open(&self, host: &str, port: u16, handler: Arc<dyn EventHandler>) -> Result<ConnectionId> {
        ReactorClient::open(self, host, port, handler)
    }

    fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        ReactorClient::send(self, conn, data)
    }

    fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        ReactorClient::await_data(self, conn, timeout)
    }

    fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        ReactorClient::close(self, conn, force)
    }

    fn close_with(&self, conn: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        ReactorClient::close_with(self, conn, force, cause)
    }

    fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        ReactorClient::local_addr(self, id)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        ReactorClient::peer_addr(self, id)
    }

    fn request_stop(&self) {
        ReactorClient::request_stop(self)
    }
}
