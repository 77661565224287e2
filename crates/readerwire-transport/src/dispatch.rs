use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::config::ReactorConfig;
use crate::error::{Result, TransportError};
use crate::event::{CloseCause, ConnectionId, Event, EventHandler};
use crate::reactor::Reactor;

/// Routes reactor events to the handler bound to each connection.
///
/// Accepted connections inherit the handler of their listening socket when
/// their `Opened` event passes through; `Closed` drops the binding. Events
/// for targets without a handler are dropped.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<ConnectionId, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, id: ConnectionId, handler: Arc<dyn EventHandler>) {
        self.lock().insert(id, handler);
    }

    pub fn unbind(&self, id: ConnectionId) -> Option<Arc<dyn EventHandler>> {
        self.lock().remove(&id)
    }

    pub fn is_bound(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Arc<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find (and update bindings for) the handler that should see `event`.
    fn route(&self, event: &Event) -> Option<Arc<dyn EventHandler>> {
        let conn = event.conn();
        let listener = event.listener();
        let mut handlers = self.lock();
        let inherited = |handlers: &HashMap<ConnectionId, Arc<dyn EventHandler>>| {
            listener.and_then(|l| handlers.get(&l).cloned())
        };

        match event {
            Event::Opened { .. } => match handlers.get(&conn).cloned() {
                Some(handler) => Some(handler),
                None => {
                    let handler = inherited(&handlers)?;
                    handlers.insert(conn, Arc::clone(&handler));
                    Some(handler)
                }
            },
            Event::Closed(_) => handlers.remove(&conn).or_else(|| inherited(&handlers)),
            Event::Sent { .. } | Event::Received { .. } => handlers
                .get(&conn)
                .cloned()
                .or_else(|| inherited(&handlers)),
        }
    }
}

impl EventHandler for HandlerRegistry {
    fn handle(&self, event: Event) {
        match self.route(&event) {
            Some(handler) => handler.handle(event),
            None => trace!(conn = %event.conn(), "event for unbound connection dropped"),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("bound", &self.len())
            .finish()
    }
}

/// Reactor plus handler registry, shared by the client and server roles.
#[derive(Debug)]
pub(crate) struct Facade {
    pub reactor: Reactor,
    pub handlers: Arc<HandlerRegistry>,
}

impl Facade {
    pub fn spawn(config: ReactorConfig) -> Result<Self> {
        let handlers = Arc::new(HandlerRegistry::new());
        let reactor = Reactor::spawn(config, Arc::clone(&handlers) as Arc<dyn EventHandler>)?;
        Ok(Self { reactor, handlers })
    }

    /// Bind `handler` under a fresh id, then run `register`; unbind on failure.
    pub fn register_with<F>(&self, handler: Arc<dyn EventHandler>, register: F) -> Result<ConnectionId>
    where
        F: FnOnce(&Reactor, ConnectionId) -> Result<()>,
    {
        if self.reactor.is_stopping() {
            return Err(TransportError::ServiceStopped);
        }
        let id = self.reactor.allocate_id();
        self.handlers.bind(id, handler);
        if let Err(err) = register(&self.reactor, id) {
            self.handlers.unbind(id);
            return Err(err);
        }
        Ok(id)
    }

    pub fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        self.reactor.send(conn, data)
    }

    pub fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        self.reactor.await_data(conn, timeout)
    }

    pub fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        self.reactor.close(conn, force)
    }

    pub fn close_with(&self, conn: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        self.reactor.close_with(conn, force, cause)
    }

    /// Close and wait up to the configured close timeout for the teardown.
    pub fn close_and_wait(&self, conn: ConnectionId, force: bool) -> Result<()> {
        self.reactor.close(conn, force)?;
        match self
            .reactor
            .await_closed(conn, self.reactor.config().close_timeout)
        {
            Err(TransportError::UnknownConnection(_)) => Ok(()),
            other => other,
        }
    }

    pub fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.reactor.local_addr(id)
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.reactor.peer_addr(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::event::{CloseCause, ClosedEvent};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl EventHandler for Counter {
        fn handle(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn closed(conn: u64, listener: Option<u64>) -> Event {
        Event::Closed(ClosedEvent {
            conn: ConnectionId(conn),
            listener: listener.map(ConnectionId),
            pending_send: Bytes::new(),
            pending_received: Bytes::new(),
            cause: CloseCause::Clean,
        })
    }

    #[test]
    fn accepted_connection_inherits_listener_handler() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.bind(ConnectionId(1), counter.clone());

        registry.handle(Event::Opened {
            conn: ConnectionId(2),
            listener: Some(ConnectionId(1)),
        });
        assert!(registry.is_bound(ConnectionId(2)));

        registry.handle(Event::Received {
            conn: ConnectionId(2),
            listener: Some(ConnectionId(1)),
        });
        registry.handle(closed(2, Some(1)));
        assert!(!registry.is_bound(ConnectionId(2)));
        assert!(registry.is_bound(ConnectionId(1)));
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unbound_events_are_dropped() {
        let registry = HandlerRegistry::new();
        registry.handle(Event::Received {
            conn: ConnectionId(7),
            listener: None,
        });
        registry.handle(closed(7, None));
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_removed_mid_stream_is_tolerated() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.bind(ConnectionId(3), counter.clone());
        registry.unbind(ConnectionId(3));

        registry.handle(Event::Sent {
            conn: ConnectionId(3),
            listener: None,
            data: Bytes::from_static(b"x"),
        });
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
