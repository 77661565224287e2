use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use readerwire_frame::{FrameCodec, FrameError, MessageFramer};
use readerwire_transport::{
    CloseCause, ClosedEvent, ConnectionId, Endpoint, Event, EventHandler, TransportError,
};
use tracing::{debug, trace, warn};

use crate::config::{AdapterConfig, Delivery};
use crate::error::{ProtocolError, Result};
use crate::event::{ProtocolEvent, ProtocolHandler};

/// Framing state guarded by one lock: the framer plus raw chunks that were
/// taken from the endpoint but not yet framed.
struct Frames<C: FrameCodec> {
    framer: MessageFramer<ConnectionId, C>,
    raw: HashMap<ConnectionId, VecDeque<Bytes>>,
    /// Awaiters between taking bytes from the endpoint and queueing them.
    pulling: HashMap<ConnectionId, usize>,
}

struct Inner<E, C: FrameCodec> {
    endpoint: E,
    config: AdapterConfig,
    frames: Mutex<Frames<C>>,
    /// Signalled whenever a pull settles.
    settled: Condvar,
}

/// Turns an [`Endpoint`]'s byte stream into framed messages.
///
/// The adapter intercepts the events of every connection it opens:
/// - `Opened` prepares an empty raw queue so early awaiters never race it
/// - `Received` frames inbound bytes when [`Delivery::Events`] is configured
/// - `Closed` folds framer and queue residue into `pending_received`
///
/// Malformed input never loses bytes: after a framing error the framer's
/// partial bytes and the rest of the chunk are queued again, ahead of any
/// newer data.
pub struct ProtocolAdapter<E, C: FrameCodec> {
    inner: Arc<Inner<E, C>>,
}

impl<E: Endpoint + 'static, C: FrameCodec> ProtocolAdapter<E, C> {
    pub fn new(endpoint: E, codec: C) -> Self {
        Self::with_config(endpoint, codec, AdapterConfig::default())
    }

    pub fn with_config(endpoint: E, codec: C, config: AdapterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                config,
                frames: Mutex::new(Frames {
                    framer: MessageFramer::new(codec),
                    raw: HashMap::new(),
                    pulling: HashMap::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Open a connection or listener through the endpoint, routing its
    /// events through the adapter to `handler`.
    pub fn open(
        &self,
        host: &str,
        port: u16,
        handler: Arc<dyn ProtocolHandler<C::Message>>,
    ) -> Result<ConnectionId> {
        let interceptor = Interceptor {
            inner: Arc::downgrade(&self.inner),
            handler,
        };
        Ok(self.inner.endpoint.open(host, port, Arc::new(interceptor))?)
    }

    /// Encode `message` and queue it on `conn`.
    pub fn send_message(&self, conn: ConnectionId, message: &C::Message) -> Result<()> {
        let mut buf = BytesMut::new();
        self.inner.frames().framer.codec().encode(message, &mut buf)?;
        trace!(%conn, bytes = buf.len(), "message encoded");
        Ok(self.inner.endpoint.send(conn, buf.freeze())?)
    }

    /// Wait for the next complete message on `conn`.
    ///
    /// Bytes left over after the message stay queued for the next call.
    /// `Some(Duration::ZERO)` frames only what is already here; `None` waits
    /// indefinitely. Expiry surfaces as [`ProtocolError::Timeout`] carrying
    /// the caller's timeout. If the connection closes meanwhile the call
    /// fails with `UnknownConnection` and the partial bytes are reported on
    /// [`ProtocolEvent::Closed`].
    pub fn await_message(
        &self,
        conn: ConnectionId,
        timeout: Option<Duration>,
    ) -> Result<C::Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(message) = self.inner.frame_next(conn)? {
                return Ok(message);
            }

            let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.inner.begin_pull(conn);
            let pulled = self.inner.endpoint.await_data(conn, wait);
            match self.inner.end_pull(conn, pulled) {
                Ok(queued) => {
                    if !queued && wait.is_some_and(|w| w.is_zero()) {
                        return Err(ProtocolError::Timeout(timeout.unwrap_or_default()));
                    }
                }
                Err(TransportError::Timeout(_)) => {
                    return Err(ProtocolError::Timeout(timeout.unwrap_or_default()))
                }
                // Buffered bytes stay put for the closed event to collect.
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Bytes held by the adapter for `conn` that have not been framed yet.
    pub fn pending_len(&self, conn: ConnectionId) -> usize {
        let frames = self.inner.frames();
        let queued: usize = frames
            .raw
            .get(&conn)
            .map_or(0, |queue| queue.iter().map(Bytes::len).sum());
        frames.framer.buffered(&conn) + queued
    }

    pub fn close(&self, conn: ConnectionId, force: bool) -> Result<()> {
        Ok(self.inner.endpoint.close(conn, force)?)
    }

    /// Force-close `conn` after malformed input. The closed event carries
    /// [`CloseCause::Protocol`] and every byte the adapter still holds.
    pub fn abort(&self, conn: ConnectionId, error: &FrameError) -> Result<()> {
        debug!(%conn, %error, "closing connection on protocol failure");
        Ok(self
            .inner
            .endpoint
            .close_with(conn, true, CloseCause::Protocol(error.to_string()))?)
    }

    pub fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.inner.endpoint.local_addr(id)
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.inner.endpoint.peer_addr(id)
    }

    pub fn request_stop(&self) {
        self.inner.endpoint.request_stop();
    }
}

impl<E, C: FrameCodec> Inner<E, C> {
    fn frames(&self) -> MutexGuard<'_, Frames<C>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_raw(&self, conn: ConnectionId, chunk: Bytes) {
        self.frames().raw.entry(conn).or_default().push_back(chunk);
    }

    /// Announce that a caller is about to take bytes from the endpoint.
    fn begin_pull(&self, conn: ConnectionId) {
        *self.frames().pulling.entry(conn).or_default() += 1;
    }

    /// Queue what a pull returned and settle it; `Ok(true)` if bytes were queued.
    fn end_pull(
        &self,
        conn: ConnectionId,
        pulled: std::result::Result<Bytes, TransportError>,
    ) -> std::result::Result<bool, TransportError> {
        let mut frames = self.frames();
        let queued = match &pulled {
            Ok(chunk) if !chunk.is_empty() => {
                frames.raw.entry(conn).or_default().push_back(chunk.clone());
                true
            }
            _ => false,
        };
        if let Some(count) = frames.pulling.get_mut(&conn) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                frames.pulling.remove(&conn);
            }
        }
        drop(frames);
        self.settled.notify_all();
        pulled.map(|_| queued)
    }

    /// Frame queued raw chunks until one message completes.
    ///
    /// On a framing error the framer residue and the unconsumed part of the
    /// chunk go back to the front of the queue, residue first.
    fn frame_next(&self, conn: ConnectionId) -> Result<Option<C::Message>> {
        let mut frames = self.frames();
        let Frames { framer, raw, .. } = &mut *frames;
        let Some(queue) = raw.get_mut(&conn) else {
            return Ok(None);
        };

        while let Some(mut chunk) = queue.pop_front() {
            match framer.append(&conn, &mut chunk) {
                Ok(Some(message)) => {
                    if chunk.has_remaining() {
                        queue.push_front(chunk);
                    }
                    return Ok(Some(message));
                }
                Ok(None) => {}
                Err(err) => {
                    if chunk.has_remaining() {
                        queue.push_front(chunk);
                    }
                    if let Some(residue) = framer.remove(&conn).filter(|r| !r.is_empty()) {
                        queue.push_front(residue);
                    }
                    warn!(%conn, error = %err, "framing failed; bytes kept");
                    return Err(err.into());
                }
            }
        }
        Ok(None)
    }

    /// Drop all adapter state for `conn`, returning its bytes in order.
    ///
    /// The connection is already gone from the endpoint, so in-flight pulls
    /// return promptly; their bytes are waited for.
    fn take_residue(&self, conn: ConnectionId) -> Vec<Bytes> {
        let mut frames = self.frames();
        while frames.pulling.contains_key(&conn) {
            frames = self
                .settled
                .wait(frames)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let mut parts = Vec::new();
        parts.extend(frames.framer.remove(&conn));
        parts.extend(frames.raw.remove(&conn).into_iter().flatten());
        parts
    }
}

impl<E: Endpoint, C: FrameCodec> Inner<E, C> {
    /// Pull whatever the endpoint holds and push every complete message.
    fn deliver_messages(
        &self,
        conn: ConnectionId,
        listener: Option<ConnectionId>,
        handler: &dyn ProtocolHandler<C::Message>,
    ) {
        match self.endpoint.await_data(conn, Some(Duration::ZERO)) {
            Ok(chunk) if !chunk.is_empty() => self.queue_raw(conn, chunk),
            Ok(_) => {}
            Err(err) => {
                debug!(%conn, error = %err, "inbound drain skipped");
                return;
            }
        }

        loop {
            match self.frame_next(conn) {
                Ok(Some(message)) => handler.handle(ProtocolEvent::MessageReceived {
                    conn,
                    listener,
                    message,
                }),
                Ok(None) => break,
                Err(ProtocolError::Framing(error)) => {
                    handler.handle(ProtocolEvent::FramingFailed {
                        conn,
                        listener,
                        error,
                    });
                    break;
                }
                Err(_) => break,
            }
        }
    }

    fn closed(&self, closed: ClosedEvent) -> ProtocolEvent<C::Message> {
        let ClosedEvent {
            conn,
            listener,
            pending_send,
            pending_received,
            cause,
        } = closed;

        let mut parts = self.take_residue(conn);
        parts.push(pending_received);
        let total: usize = parts.iter().map(Bytes::len).sum();
        let mut combined = BytesMut::with_capacity(total);
        for part in parts {
            combined.extend_from_slice(&part);
        }

        ProtocolEvent::Closed {
            conn,
            listener,
            pending_send,
            pending_received: combined.freeze(),
            cause,
        }
    }
}

/// Reactor-side handler installed by [`ProtocolAdapter::open`].
struct Interceptor<E, C: FrameCodec> {
    inner: Weak<Inner<E, C>>,
    handler: Arc<dyn ProtocolHandler<C::Message>>,
}

impl<E: Endpoint + 'static, C: FrameCodec> EventHandler for Interceptor<E, C> {
    fn handle(&self, event: Event) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let protocol_event = match event {
            Event::Opened { conn, listener } => {
                inner.frames().raw.entry(conn).or_default();
                ProtocolEvent::Opened { conn, listener }
            }
            Event::Sent {
                conn,
                listener,
                data,
            } => ProtocolEvent::Sent {
                conn,
                listener,
                data,
            },
            Event::Received { conn, listener } => match inner.config.delivery {
                Delivery::Await => ProtocolEvent::DataReceived { conn, listener },
                Delivery::Events => {
                    inner.deliver_messages(conn, listener, self.handler.as_ref());
                    return;
                }
            },
            Event::Closed(closed) => inner.closed(closed),
        };
        self.handler.handle(protocol_event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use readerwire_frame::{encode_message, FrameError, Message, ReaderCodec};
    use readerwire_transport::{CloseCause, Result as TransportResult};

    use super::*;

    #[derive(Default)]
    struct FakeState {
        inbound: Mutex<VecDeque<Bytes>>,
        sent: Mutex<Vec<Bytes>>,
        closes: Mutex<Vec<(bool, CloseCause)>>,
        gone: std::sync::atomic::AtomicBool,
        handler: Mutex<Option<Arc<dyn EventHandler>>>,
    }

    /// In-memory endpoint: `await_data` drains `inbound`, events are injected
    /// through the handler captured by `open`.
    #[derive(Clone, Default)]
    struct FakeEndpoint {
        state: Arc<FakeState>,
    }

    impl FakeEndpoint {
        fn push(&self, data: &[u8]) {
            self.state
                .inbound
                .lock()
                .unwrap()
                .push_back(Bytes::copy_from_slice(data));
        }

        fn emit(&self, event: Event) {
            let handler = self.state.handler.lock().unwrap().clone().unwrap();
            handler.handle(event);
        }

        fn sent(&self) -> Vec<Bytes> {
            self.state.sent.lock().unwrap().clone()
        }

        /// Make every further `await_data` fail as if the reactor dropped the
        /// connection before its closed event went out.
        fn drop_connection(&self) {
            self.state
                .gone
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl Endpoint for FakeEndpoint {
        fn open(
            &self,
            _host: &str,
            _port: u16,
            handler: Arc<dyn EventHandler>,
        ) -> TransportResult<ConnectionId> {
            *self.state.handler.lock().unwrap() = Some(handler);
            Ok(ConnectionId::from_raw(1))
        }

        fn send(&self, _conn: ConnectionId, data: Bytes) -> TransportResult<()> {
            self.state.sent.lock().unwrap().push(data);
            Ok(())
        }

        fn await_data(
            &self,
            conn: ConnectionId,
            timeout: Option<Duration>,
        ) -> TransportResult<Bytes> {
            if self.state.gone.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::UnknownConnection(conn));
            }
            let mut inbound = self.state.inbound.lock().unwrap();
            let mut out = BytesMut::new();
            while let Some(chunk) = inbound.pop_front() {
                out.extend_from_slice(&chunk);
            }
            match timeout {
                Some(t) if out.is_empty() && !t.is_zero() => Err(TransportError::Timeout(t)),
                _ => Ok(out.freeze()),
            }
        }

        fn close_with(
            &self,
            _conn: ConnectionId,
            force: bool,
            cause: CloseCause,
        ) -> TransportResult<()> {
            self.state.closes.lock().unwrap().push((force, cause));
            Ok(())
        }

        fn local_addr(&self, _id: ConnectionId) -> Option<SocketAddr> {
            None
        }

        fn peer_addr(&self, _id: ConnectionId) -> Option<SocketAddr> {
            None
        }

        fn request_stop(&self) {}
    }

    type Adapter = ProtocolAdapter<FakeEndpoint, ReaderCodec>;

    fn adapter(
        delivery: Delivery,
    ) -> (
        Adapter,
        FakeEndpoint,
        ConnectionId,
        mpsc::Receiver<ProtocolEvent<Message>>,
    ) {
        let endpoint = FakeEndpoint::default();
        let adapter = ProtocolAdapter::with_config(
            endpoint.clone(),
            ReaderCodec::new(),
            AdapterConfig { delivery },
        );
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |event: ProtocolEvent<Message>| {
            let _ = tx.lock().unwrap().send(event);
        };
        let conn = adapter.open("fake", 0, Arc::new(handler)).unwrap();
        endpoint.emit(Event::Opened {
            conn,
            listener: None,
        });
        assert!(matches!(rx.recv().unwrap(), ProtocolEvent::Opened { .. }));
        (adapter, endpoint, conn, rx)
    }

    fn wire(id: u32, body: &'static [u8]) -> Bytes {
        encode_message(&Message::new(1, 62, id, body)).unwrap()
    }

    fn closed_event(conn: ConnectionId, pending_received: &'static [u8]) -> Event {
        Event::Closed(ClosedEvent {
            conn,
            listener: None,
            pending_send: Bytes::new(),
            pending_received: Bytes::from_static(pending_received),
            cause: CloseCause::RemoteReset,
        })
    }

    #[test]
    fn await_message_keeps_leftover_for_next_call() {
        let (adapter, endpoint, conn, _rx) = adapter(Delivery::Await);
        let mut both = BytesMut::new();
        both.extend_from_slice(&wire(1, b"first"));
        both.extend_from_slice(&wire(2, b"second"));
        endpoint.push(&both);

        let first = adapter.await_message(conn, Some(Duration::ZERO)).unwrap();
        assert_eq!(first.header.id, 1);
        assert_eq!(adapter.pending_len(conn), wire(2, b"second").len());

        let second = adapter.await_message(conn, Some(Duration::ZERO)).unwrap();
        assert_eq!(second.body.as_ref(), b"second");
        assert_eq!(adapter.pending_len(conn), 0);
    }

    #[test]
    fn zero_timeout_without_message_is_timeout() {
        let (adapter, endpoint, conn, _rx) = adapter(Delivery::Await);
        endpoint.push(&wire(1, b"body")[..4]);

        let err = adapter
            .await_message(conn, Some(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(t) if t.is_zero()));
        assert_eq!(adapter.pending_len(conn), 4);
    }

    #[test]
    fn inner_timeout_reports_callers_timeout() {
        let (adapter, _endpoint, conn, _rx) = adapter(Delivery::Await);
        let err = adapter
            .await_message(conn, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(t) if t == Duration::from_millis(20)));
    }

    #[test]
    fn framing_failure_preserves_every_byte() {
        let (adapter, endpoint, conn, rx) = adapter(Delivery::Await);
        // Version 7 is not supported; length 12; two body bytes.
        let bad = [0x1C, 0x00, 0, 0, 0, 12, 0, 0, 0, 1, 0xAA, 0xBB];
        endpoint.push(&bad);

        let err = adapter
            .await_message(conn, Some(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FrameError::UnsupportedVersion(7))
        ));
        assert_eq!(adapter.pending_len(conn), bad.len());

        // Retrying sees the same bytes and fails the same way.
        assert!(matches!(
            adapter.await_message(conn, Some(Duration::ZERO)),
            Err(ProtocolError::Framing(_))
        ));

        endpoint.emit(closed_event(conn, b""));
        let ProtocolEvent::Closed {
            pending_received, ..
        } = rx.recv().unwrap()
        else {
            panic!("expected closed event");
        };
        assert_eq!(pending_received.as_ref(), &bad);
    }

    #[test]
    fn close_reports_framer_then_raw_then_reactor_residue() {
        let (adapter, endpoint, conn, rx) = adapter(Delivery::Await);
        let message = wire(5, b"0123456789");
        // Header plus 3 body bytes reach the framer; nothing completes.
        endpoint.push(&message[..13]);
        assert!(adapter.await_message(conn, Some(Duration::ZERO)).is_err());
        assert_eq!(adapter.pending_len(conn), 13);

        endpoint.emit(closed_event(conn, b"xyz"));
        let ProtocolEvent::Closed {
            pending_received, ..
        } = rx.recv().unwrap()
        else {
            panic!("expected closed event");
        };
        let mut expected = message[..13].to_vec();
        expected.extend_from_slice(b"xyz");
        assert_eq!(pending_received.as_ref(), expected.as_slice());
        assert_eq!(adapter.pending_len(conn), 0);
    }

    #[test]
    fn awaiter_failing_on_vanished_connection_keeps_partial_bytes() {
        let (adapter, endpoint, conn, rx) = adapter(Delivery::Await);
        endpoint.push(&[0x04, 0x3e, 0x00]);
        assert!(adapter.await_message(conn, Some(Duration::ZERO)).is_err());

        endpoint.drop_connection();
        let err = adapter.await_message(conn, None).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Transport(TransportError::UnknownConnection(_))
        ));
        assert_eq!(adapter.pending_len(conn), 3);

        endpoint.emit(closed_event(conn, b""));
        let ProtocolEvent::Closed {
            pending_received, ..
        } = rx.recv().unwrap()
        else {
            panic!("expected closed event");
        };
        assert_eq!(pending_received.as_ref(), &[0x04, 0x3e, 0x00]);
    }

    #[test]
    fn abort_closes_with_protocol_cause() {
        let (adapter, endpoint, conn, _rx) = adapter(Delivery::Events);
        adapter
            .abort(conn, &FrameError::UnsupportedVersion(7))
            .unwrap();

        let closes = endpoint.state.closes.lock().unwrap();
        assert_eq!(closes.len(), 1);
        let (force, cause) = &closes[0];
        assert!(*force);
        assert!(matches!(cause, CloseCause::Protocol(detail) if detail.contains("version 7")));
    }

    #[test]
    fn event_delivery_pushes_each_message() {
        let (_adapter, endpoint, conn, rx) = adapter(Delivery::Events);
        let first = wire(1, b"a");
        let second = wire(2, b"");
        endpoint.push(&first);
        endpoint.push(&second[..3]);
        endpoint.emit(Event::Received {
            conn,
            listener: None,
        });
        let ProtocolEvent::MessageReceived { message, .. } = rx.recv().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(message.header.id, 1);
        assert!(rx.try_recv().is_err());

        endpoint.push(&second[3..]);
        endpoint.emit(Event::Received {
            conn,
            listener: None,
        });
        let ProtocolEvent::MessageReceived { message, .. } = rx.recv().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(message.header.id, 2);
        assert!(message.body.is_empty());
    }

    #[test]
    fn send_message_encodes_through_codec() {
        let (adapter, endpoint, conn, _rx) = adapter(Delivery::Await);
        let message = Message::new(2, 3, 9, &b"hi"[..]);
        adapter.send_message(conn, &message).unwrap();
        assert_eq!(endpoint.sent(), vec![encode_message(&message).unwrap()]);

        let wide = Message::new(2, 0x0400, 9, Bytes::new());
        assert!(matches!(
            adapter.send_message(conn, &wide),
            Err(ProtocolError::Framing(FrameError::Encode(_)))
        ));
    }
}
