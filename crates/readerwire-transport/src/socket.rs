use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::debug;

use crate::error::{Result, TransportError};

/// A socket created by a caller thread, waiting for the reactor to register it.
#[derive(Debug)]
pub(crate) enum PendingSocket {
    Listener(TcpListener),
    Connecting(TcpStream),
}

/// A socket owned and polled by the reactor thread.
#[derive(Debug)]
pub(crate) enum Watched {
    Listener(TcpListener),
    Stream(WatchedStream),
}

#[derive(Debug)]
pub(crate) struct WatchedStream {
    pub stream: TcpStream,
    /// Non-blocking connect still in flight.
    pub connecting: bool,
    /// Currently registered for write readiness.
    pub writing: bool,
}

impl Watched {
    pub fn from_pending(pending: PendingSocket) -> Self {
        match pending {
            PendingSocket::Listener(listener) => Self::Listener(listener),
            PendingSocket::Connecting(stream) => Self::Stream(WatchedStream {
                stream,
                connecting: true,
                writing: false,
            }),
        }
    }

    /// Interest matching the socket's current phase.
    pub fn interest(&self) -> Interest {
        match self {
            Self::Listener(_) => Interest::READABLE,
            Self::Stream(s) if s.connecting => Interest::WRITABLE,
            Self::Stream(s) if s.writing => Interest::READABLE | Interest::WRITABLE,
            Self::Stream(_) => Interest::READABLE,
        }
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = self.interest();
        self.source().register(registry, token, interest)
    }

    pub fn reregister(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = self.interest();
        self.source().reregister(registry, token, interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.source().deregister(registry)
    }

    fn source(&mut self) -> &mut dyn Source {
        match self {
            Self::Listener(listener) => listener,
            Self::Stream(s) => &mut s.stream,
        }
    }
}

/// Resolve `host:port` to the first usable address.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_err = |source| TransportError::Resolve {
        host: host.to_string(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no address found for host",
            ))
        })
}

/// Bind a non-blocking listening socket.
pub(crate) fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
    debug!(%addr, "bound listening socket");
    Ok(listener)
}

/// Start a non-blocking connect; completion is observed by the reactor.
pub(crate) fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream =
        TcpStream::connect(addr).map_err(|source| TransportError::Connect { addr, source })?;
    debug!(%addr, "connect initiated");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_loopback() {
        let addr = resolve("127.0.0.1", 4000).unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn resolves_ipv6_literal() {
        let addr = resolve("::1", 4001).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 4001);
    }

    #[test]
    fn interest_follows_phase() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(Watched::Listener(listener).interest(), Interest::READABLE);

        let stream = connect(addr).unwrap();
        let mut watched = Watched::from_pending(PendingSocket::Connecting(stream));
        assert_eq!(watched.interest(), Interest::WRITABLE);

        if let Watched::Stream(s) = &mut watched {
            s.connecting = false;
            s.writing = true;
        }
        assert_eq!(
            watched.interest(),
            Interest::READABLE | Interest::WRITABLE
        );
    }
}
