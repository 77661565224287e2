use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use crate::config::ReactorConfig;
use crate::dispatch::Facade;
use crate::error::Result;
use crate::event::{CloseCause, ConnectionId, EventHandler};
use crate::socket;
use crate::traits::Endpoint;

/// Server role: listening sockets and the connections they accept, driven by
/// one reactor thread.
///
/// The handler passed to [`open`](Self::open) receives the events of every
/// connection accepted on that listener.
#[derive(Debug)]
pub struct ReactorServer {
    facade: Facade,
}

impl ReactorServer {
    pub fn new(config: ReactorConfig) -> Result<Self> {
        Ok(Self {
            facade: Facade::spawn(config)?,
        })
    }

    /// Bind `host:port` and start accepting. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub fn open(
        &self,
        host: &str,
        port: u16,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ConnectionId> {
        let addr = socket::resolve(host, port)?;
        let listener = socket::bind(addr)?;
        let bound = listener.local_addr().unwrap_or(addr);
        let id = self
            .facade
            .register_with(handler, |reactor, id| reactor.register_listener(id, listener))?;
        info!(listener = %id, addr = %bound, "server listening");
        Ok(id)
    }

    pub fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        self.facade.send(conn, data)
    }

    pub fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        self.facade.await_data(conn, timeout)
    }

    /// Close a connection, or a listener together with its connections.
    pub fn close(&self, id: ConnectionId, force: bool) -> Result<()> {
        self.facade.close(id, force)
    }

    pub fn close_with(&self, id: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        self.facade.close_with(id, force, cause)
    }

    pub fn close_and_wait(&self, id: ConnectionId, force: bool) -> Result<()> {
        self.facade.close_and_wait(id, force)
    }

    /// Address a listener is bound to, or a connection's local address.
    pub fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.facade.local_addr(id)
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

impl Endpoint for ReactorServer {
    fn open(&self, host: &str, port: u16, handler: Arc<dyn EventHandler>) -> Result<ConnectionId> {
        ReactorServer::open(self, host, port, handler)
    }

    fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        ReactorServer::send(self, conn, data)
    }

    fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        ReactorServer::await_data(self, conn, timeout)
    }

    fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        ReactorServer::close(self, conn, force)
    }

    fn close_with(&self, conn: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        ReactorServer::close_with(self, conn, force, cause)
    }

    fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        ReactorServer::local_addr(self, id)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        ReactorServer::peer_addr(self, id)
    }

    fn request_stop(&self) {
        ReactorServer::request_stop(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;

    use super::*;
    use crate::client::ReactorClient;
    use crate::error::TransportError;
    use crate::event::{CloseCause, Event};

    fn recorder() -> (Arc<dyn EventHandler>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |event: Event| {
            let _ = tx.lock().unwrap().send(event);
        };
        (Arc::new(handler), rx)
    }

    fn recv(rx: &mpsc::Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn client_to_server_bytes_and_remote_close() {
        let server = ReactorServer::new(ReactorConfig::default()).unwrap();
        let (server_handler, server_events) = recorder();
        let listener = server.open("127.0.0.1", 0, server_handler).unwrap();
        let port = server.local_addr(listener).unwrap().port();

        let client = ReactorClient::new(ReactorConfig::default()).unwrap();
        let (client_handler, _client_events) = recorder();
        let conn = client.connect("127.0.0.1", port, client_handler).unwrap();
        client
            .send(conn, Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]))
            .unwrap();

        let Event::Opened { conn: accepted, .. } = recv(&server_events) else {
            panic!("expected opened event");
        };
        let mut received = Vec::new();
        while received.len() < 4 {
            let chunk = server
                .await_data(accepted, Some(Duration::from_secs(5)))
                .unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, [0x01, 0x02, 0x03, 0x04]);

        client.close_and_wait(conn, false).unwrap();
        let closed = loop {
            if let Event::Closed(closed) = recv(&server_events) {
                break closed;
            }
        };
        assert_eq!(closed.conn, accepted);
        assert!(closed.pending_received.is_empty());
        assert!(matches!(closed.cause, CloseCause::RemoteReset));
    }

    #[test]
    fn unknown_and_stopped_errors() {
        let server = ReactorServer::new(ReactorConfig::default()).unwrap();
        let (handler, _events) = recorder();
        let listener = server.open("127.0.0.1", 0, handler.clone()).unwrap();

        assert!(matches!(
            server.send(listener, Bytes::from_static(b"x")),
            Err(TransportError::NotAStream(_))
        ));

        server.shutdown();
        assert!(matches!(
            server.open("127.0.0.1", 0, handler),
            Err(TransportError::ServiceStopped)
        ));
        assert!(matches!(
            server.await_data(listener, Some(Duration::ZERO)),
            Err(TransportError::UnknownConnection(_))
        ));
        // Already closed by the shutdown.
        server.close(listener, false).unwrap();
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let port = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let client = ReactorClient::new(ReactorConfig::default()).unwrap();
        let (handler, _events) = recorder();
        let err = client.connect("127.0.0.1", port, handler).unwrap_err();
        assert!(matches!(
            err,
            TransportError::UnknownConnection(_) | TransportError::Connect { .. }
        ));
    }
}
