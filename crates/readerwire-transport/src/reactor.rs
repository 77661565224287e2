use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::change::{ChangeKind, ChangeRequest};
use crate::config::ReactorConfig;
use crate::error::{Result, TransportError};
use crate::event::{CloseCause, ClosedEvent, ConnectionId, Event, EventHandler};
use crate::socket::{PendingSocket, Watched, WatchedStream};
use crate::table::{Entry, EntryKind, OutboundChunk, Shared, State};

const WAKE_TOKEN: Token = Token(0);

fn token(id: ConnectionId) -> Token {
    Token(id.0 as usize)
}

/// Handle to a reactor thread.
///
/// All socket I/O happens on the reactor thread. Methods on this handle only
/// queue change requests, or block on a connection's inbound queue, so they
/// are safe to call from any thread except from inside an [`EventHandler`]
/// (where blocking waits would stall the loop delivering the event).
pub struct Reactor {
    shared: Arc<Shared>,
    config: ReactorConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Start a reactor thread delivering every event to `handler`.
    pub fn spawn(config: ReactorConfig, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(Shared::new(waker));

        let run_loop = ReactorLoop {
            poll,
            shared: Arc::clone(&shared),
            handler,
            sockets: HashMap::new(),
            pending_events: Vec::new(),
            read_buf: vec![0; config.read_buffer_size.max(1)],
        };
        let capacity = config.event_capacity.max(1);
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_loop.run(capacity))?;

        info!(
            thread = %config.thread_name,
            read_buffer_size = config.read_buffer_size,
            "reactor started"
        );

        Ok(Self {
            shared,
            config,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Reserve an id ahead of registration so handlers can be bound first.
    pub fn allocate_id(&self) -> ConnectionId {
        self.shared.allocate_id()
    }

    /// Queue registration of a bound listening socket under `id`.
    pub fn register_listener(&self, id: ConnectionId, listener: TcpListener) -> Result<()> {
        let mut entry = Entry::new(EntryKind::Listener, None);
        entry.local_addr = listener.local_addr().ok();
        self.register(id, entry, PendingSocket::Listener(listener))
    }

    /// Queue registration of a connecting stream under `id`.
    pub fn register_stream(&self, id: ConnectionId, stream: TcpStream) -> Result<()> {
        let entry = Entry::new(EntryKind::Stream, None);
        self.register(id, entry, PendingSocket::Connecting(stream))
    }

    fn register(&self, id: ConnectionId, entry: Entry, socket: PendingSocket) -> Result<()> {
        let mut state = self.shared.lock();
        if state.stopping {
            return Err(TransportError::ServiceStopped);
        }
        state.entries.insert(id, entry);
        self.shared
            .submit(&mut state, ChangeRequest::register(id, socket))
    }

    /// Queue `data` for sending on `conn`.
    pub fn send(&self, conn: ConnectionId, data: Bytes) -> Result<()> {
        let mut state = self.shared.lock();
        if state.stopping {
            return Err(TransportError::ServiceStopped);
        }
        match state.entries.get(&conn) {
            None => return Err(TransportError::UnknownConnection(conn)),
            Some(entry) if entry.kind == EntryKind::Listener => {
                return Err(TransportError::NotAStream(conn))
            }
            Some(_) => {}
        }
        if data.is_empty() {
            return Ok(());
        }
        trace!(%conn, bytes = data.len(), "send queued");
        self.shared
            .submit(&mut state, ChangeRequest::write(conn, data))
    }

    /// Queue closing `target`. Closing an already closed id is a no-op.
    ///
    /// Without `force` the close waits until queued writes have drained.
    pub fn close(&self, target: ConnectionId, force: bool) -> Result<()> {
        self.close_with(target, force, CloseCause::Clean)
    }

    /// Like [`close`](Self::close), reporting `cause` on the closed event.
    pub fn close_with(&self, target: ConnectionId, force: bool, cause: CloseCause) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.entries.contains_key(&target) {
            if self.shared.was_issued(target) {
                trace!(conn = %target, "close of closed connection ignored");
                return Ok(());
            }
            return Err(TransportError::UnknownConnection(target));
        }
        debug!(conn = %target, force, %cause, "close requested");
        self.shared
            .submit(&mut state, ChangeRequest::close_with(target, force, cause))
    }

    /// Take everything queued inbound for `conn`, waiting according to `timeout`.
    ///
    /// * `Some(Duration::ZERO)` returns immediately, possibly with no bytes.
    /// * `Some(d)` waits up to `d`, then fails with [`TransportError::Timeout`].
    /// * `None` waits until data arrives or the connection closes.
    ///
    /// A connection that closes while waiting yields
    /// [`TransportError::UnknownConnection`].
    pub fn await_data(&self, conn: ConnectionId, timeout: Option<Duration>) -> Result<Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            let entry = state
                .entries
                .get_mut(&conn)
                .ok_or(TransportError::UnknownConnection(conn))?;
            if entry.kind == EntryKind::Listener {
                return Err(TransportError::NotAStream(conn));
            }
            if !entry.inbound.is_empty() {
                return Ok(entry.drain_inbound());
            }
            if timeout == Some(Duration::ZERO) {
                return Ok(Bytes::new());
            }

            let ready = Arc::clone(&entry.ready);
            state = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::Timeout(timeout));
                    }
                    ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => ready.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Wait until `conn` has finished connecting.
    pub fn await_opened(&self, conn: ConnectionId, timeout: Duration) -> Result<()> {
        self.wait_until(conn, timeout, |entry| entry.map(|e| e.opened))
    }

    /// Wait until `conn` has been closed and removed.
    pub fn await_closed(&self, conn: ConnectionId, timeout: Duration) -> Result<()> {
        self.wait_until(conn, timeout, |entry| Some(entry.is_none()))
    }

    /// Block until `check` returns `Some(true)`; `None` means the id is gone.
    fn wait_until<F>(&self, conn: ConnectionId, timeout: Duration, check: F) -> Result<()>
    where
        F: Fn(Option<&Entry>) -> Option<bool>,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            let entry = state.entries.get(&conn);
            match check(entry) {
                Some(true) => return Ok(()),
                None => return Err(TransportError::UnknownConnection(conn)),
                Some(false) => {}
            }
            let Some(ready) = entry.map(|e| Arc::clone(&e.ready)) else {
                return Err(TransportError::UnknownConnection(conn));
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout(timeout));
            }
            state = ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Whether `id` is currently registered (or awaiting registration).
    pub fn is_known(&self, id: ConnectionId) -> bool {
        self.shared.lock().entries.contains_key(&id)
    }

    /// Bytes waiting in the inbound queue of `conn`.
    pub fn pending_inbound(&self, conn: ConnectionId) -> usize {
        self.shared
            .lock()
            .entries
            .get(&conn)
            .map_or(0, |entry| entry.inbound.iter().map(Bytes::len).sum())
    }

    pub fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.shared.lock().entries.get(&id).and_then(|e| e.local_addr)
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.shared.lock().entries.get(&id).and_then(|e| e.peer_addr)
    }

    /// Ask the reactor to stop. Idempotent; later mutations fail with
    /// [`TransportError::ServiceStopped`].
    pub fn request_stop(&self) {
        let mut state = self.shared.lock();
        if !state.stopping {
            state.stopping = true;
            info!("reactor stop requested");
        }
        drop(state);
        self.shared.wake();
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.lock().stopping
    }

    /// Wait for the reactor thread to finish. No-op on the reactor thread itself.
    pub fn join(&self) {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        let on_reactor = slot
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id());
        if on_reactor {
            return;
        }
        if let Some(handle) = slot.take() {
            if handle.join().is_err() {
                error!("reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("thread", &self.config.thread_name)
            .finish()
    }
}

/// State owned by the reactor thread.
struct ReactorLoop {
    poll: Poll,
    shared: Arc<Shared>,
    handler: Arc<dyn EventHandler>,
    sockets: HashMap<ConnectionId, Watched>,
    pending_events: Vec<Event>,
    read_buf: Vec<u8>,
}

impl ReactorLoop {
    fn run(mut self, capacity: usize) {
        let mut events = Events::with_capacity(capacity);
        let cause = loop {
            let retry_now = self.apply_changes();
            self.deliver_events();

            let timeout = retry_now.then_some(Duration::ZERO);
            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "multiplexer wait failed; stopping reactor");
                break CloseCause::Io(Arc::new(err));
            }

            let mut woken = false;
            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    woken = true;
                    continue;
                }
                self.dispatch(event);
            }

            if woken && self.shared.lock().stopping {
                break CloseCause::Clean;
            }
        };
        self.shutdown(cause);
    }

    /// Apply queued changes; returns true if deferred changes can already be retried.
    fn apply_changes(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        let changes = state.changes.drain();
        let mut deferred = Vec::new();

        for change in changes {
            if change.deferrable() && state.write_locks.is_locked(change.target) {
                trace!(conn = %change.target, "change deferred until write completes");
                deferred.push(change);
                continue;
            }
            self.apply(&mut state, change);
        }

        let retry_now = deferred
            .iter()
            .any(|change| !state.write_locks.is_locked(change.target));
        state.changes.requeue(deferred);
        if !state.changes.is_empty() {
            trace!(pending = state.changes.len(), retry_now, "changes left queued");
        }
        retry_now
    }

    fn apply(&mut self, state: &mut State, change: ChangeRequest) {
        let ChangeRequest { target, kind, .. } = change;
        match kind {
            ChangeKind::Register(socket) => self.register(state, target, socket),
            ChangeKind::Write(data) => self.queue_write(state, target, data),
            ChangeKind::Close(cause) => self.close(state, target, cause),
        }
    }

    fn register(&mut self, state: &mut State, id: ConnectionId, socket: PendingSocket) {
        if !state.entries.contains_key(&id) {
            return;
        }
        let mut watched = Watched::from_pending(socket);
        if let Err(err) = watched.register(self.poll.registry(), token(id)) {
            warn!(conn = %id, error = %err, "registration failed");
            self.close(state, id, CloseCause::io(err));
            return;
        }

        if let Watched::Listener(_) = watched {
            if let Some(entry) = state.entries.get_mut(&id) {
                entry.opened = true;
                entry.ready.notify_all();
            }
            info!(conn = %id, addr = ?state.entries.get(&id).and_then(|e| e.local_addr), "listening");
        } else {
            debug!(conn = %id, "connecting stream registered");
        }
        self.sockets.insert(id, watched);
    }

    fn queue_write(&mut self, state: &mut State, id: ConnectionId, data: Bytes) {
        let Some(entry) = state.entries.get_mut(&id) else {
            debug!(conn = %id, bytes = data.len(), "write for closed connection dropped");
            return;
        };
        let listener = entry.listener;
        entry.outbound.push_back(OutboundChunk { data, written: 0 });
        state.write_locks.lock(id, listener);
        self.set_writing(state, id, true);
    }

    /// Switch write interest on or off for an established stream.
    fn set_writing(&mut self, state: &mut State, id: ConnectionId, writing: bool) {
        let Some(watched) = self.sockets.get_mut(&id) else {
            return;
        };
        let Watched::Stream(stream) = watched else {
            return;
        };
        if stream.connecting || stream.writing == writing {
            return;
        }
        stream.writing = writing;
        if let Err(err) = watched.reregister(self.poll.registry(), token(id)) {
            warn!(conn = %id, error = %err, "interest change failed");
            self.close(state, id, CloseCause::io(err));
        }
    }

    /// Tear down `id` (cascading to accepted connections for a listener) and
    /// queue its closed event with all residue. Unknown ids are ignored.
    fn close(&mut self, state: &mut State, id: ConnectionId, cause: CloseCause) {
        let is_listener = state
            .entries
            .get(&id)
            .is_some_and(|entry| entry.kind == EntryKind::Listener);
        if is_listener {
            for child in state.children_of(id) {
                self.close(state, child, cause.clone());
            }
        }

        if let Some(mut watched) = self.sockets.remove(&id) {
            if let Err(err) = watched.deregister(self.poll.registry()) {
                debug!(conn = %id, error = %err, "deregister failed");
            }
        }

        let Some(mut entry) = state.remove_entry(id) else {
            trace!(conn = %id, "close of unknown handle ignored");
            return;
        };
        let closed = ClosedEvent {
            conn: id,
            listener: entry.listener,
            pending_send: entry.drain_outbound(),
            pending_received: entry.drain_inbound(),
            cause,
        };
        debug!(
            conn = %id,
            cause = %closed.cause,
            pending_send = closed.pending_send.len(),
            pending_received = closed.pending_received.len(),
            "closed"
        );
        self.pending_events.push(Event::Closed(closed));
    }

    fn deliver_events(&mut self) {
        for event in std::mem::take(&mut self.pending_events) {
            self.handler.handle(event);
        }
    }

    fn dispatch(&mut self, event: &mio::event::Event) {
        let id = ConnectionId(event.token().0 as u64);
        let (listening, connecting) = match self.sockets.get(&id) {
            Some(Watched::Listener(_)) => (true, false),
            Some(Watched::Stream(stream)) => (false, stream.connecting),
            // Closed earlier in this batch.
            None => return,
        };

        if listening {
            self.accept(id);
        } else if connecting {
            self.finish_connect(id);
        } else {
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.read(id);
            }
            if event.is_writable() && self.sockets.contains_key(&id) {
                let shared = Arc::clone(&self.shared);
                let mut state = shared.lock();
                self.flush(&mut state, id);
            }
        }
    }

    fn accept(&mut self, listener_id: ConnectionId) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        loop {
            let Some(Watched::Listener(listener)) = self.sockets.get(&listener_id) else {
                return;
            };
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    warn!(conn = %listener_id, error = %err, "accept failed; closing listener");
                    self.close(&mut state, listener_id, CloseCause::io(err));
                    return;
                }
            };

            let id = self.shared.allocate_id();
            let local_addr = stream.local_addr().ok();
            let mut watched = Watched::Stream(WatchedStream {
                stream,
                connecting: false,
                writing: false,
            });
            if let Err(err) = watched.register(self.poll.registry(), token(id)) {
                warn!(conn = %id, error = %err, "accepted connection registration failed");
                self.pending_events.push(Event::Closed(ClosedEvent {
                    conn: id,
                    listener: Some(listener_id),
                    pending_send: Bytes::new(),
                    pending_received: Bytes::new(),
                    cause: CloseCause::io(err),
                }));
                continue;
            }

            let mut entry = Entry::new(EntryKind::Stream, Some(listener_id));
            entry.opened = true;
            entry.local_addr = local_addr;
            entry.peer_addr = Some(peer);
            state.entries.insert(id, entry);
            self.sockets.insert(id, watched);

            debug!(conn = %id, listener = %listener_id, %peer, "accepted connection");
            self.pending_events.push(Event::Opened {
                conn: id,
                listener: Some(listener_id),
            });
        }
    }

    fn finish_connect(&mut self, id: ConnectionId) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();

        let outcome = {
            let Some(Watched::Stream(s)) = self.sockets.get_mut(&id) else {
                return;
            };
            match s.stream.take_error() {
                Ok(Some(err)) | Err(err) => Err(err),
                Ok(None) => match s.stream.peer_addr() {
                    Ok(peer) => Ok(Some((peer, s.stream.local_addr().ok()))),
                    Err(err)
                        if matches!(err.kind(), ErrorKind::NotConnected | ErrorKind::WouldBlock) =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(err),
                },
            }
        };

        let (peer, local_addr) = match outcome {
            Ok(Some(addrs)) => addrs,
            Ok(None) => return,
            Err(err) => {
                debug!(conn = %id, error = %err, "connect failed");
                self.close(&mut state, id, CloseCause::io(err));
                return;
            }
        };

        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        entry.opened = true;
        entry.peer_addr = Some(peer);
        entry.local_addr = local_addr;
        entry.ready.notify_all();
        let has_outbound = !entry.outbound.is_empty();

        if let Some(Watched::Stream(s)) = self.sockets.get_mut(&id) {
            s.connecting = false;
            s.writing = has_outbound;
        }
        if let Some(watched) = self.sockets.get_mut(&id) {
            if let Err(err) = watched.reregister(self.poll.registry(), token(id)) {
                warn!(conn = %id, error = %err, "post-connect registration failed");
                self.close(&mut state, id, CloseCause::io(err));
                return;
            }
        }

        debug!(conn = %id, %peer, "connected");
        self.pending_events.push(Event::Opened {
            conn: id,
            listener: None,
        });
        if has_outbound {
            self.flush(&mut state, id);
        }
    }

    fn read(&mut self, id: ConnectionId) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        loop {
            let Some(Watched::Stream(s)) = self.sockets.get_mut(&id) else {
                return;
            };
            let n = match s.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(conn = %id, "end of stream");
                    self.close(&mut state, id, CloseCause::RemoteReset);
                    return;
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(conn = %id, error = %err, "read failed");
                    self.close(&mut state, id, CloseCause::io(err));
                    return;
                }
            };

            let Some(entry) = state.entries.get_mut(&id) else {
                return;
            };
            trace!(conn = %id, bytes = n, "read");
            entry
                .inbound
                .push_back(Bytes::copy_from_slice(&self.read_buf[..n]));
            entry.ready.notify_all();
            let listener = entry.listener;
            self.pending_events.push(Event::Received { conn: id, listener });
        }
    }

    /// Write queued chunks until the queue is empty or the socket is full.
    fn flush(&mut self, state: &mut State, id: ConnectionId) {
        loop {
            let Some(entry) = state.entries.get_mut(&id) else {
                return;
            };
            let Some(chunk) = entry.outbound.front_mut() else {
                break;
            };
            let Some(Watched::Stream(s)) = self.sockets.get_mut(&id) else {
                return;
            };

            match s.stream.write(chunk.unwritten()) {
                Ok(0) => {
                    let err = io::Error::from(ErrorKind::WriteZero);
                    self.close(state, id, CloseCause::io(err));
                    return;
                }
                Ok(n) => {
                    chunk.written += n;
                    trace!(conn = %id, bytes = n, "wrote");
                    if chunk.written == chunk.data.len() {
                        let listener = entry.listener;
                        if let Some(done) = entry.outbound.pop_front() {
                            self.pending_events.push(Event::Sent {
                                conn: id,
                                listener,
                                data: done.data,
                            });
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(conn = %id, error = %err, "write failed");
                    self.close(state, id, CloseCause::io(err));
                    return;
                }
            }
        }

        state.write_locks.unlock(id);
        self.set_writing(state, id, false);
    }

    fn shutdown(mut self, cause: CloseCause) {
        let shared = Arc::clone(&self.shared);
        {
            let mut state = shared.lock();
            state.stopping = true;

            // Unapplied writes become residue; unregistered sockets are dropped
            // with the change and their entries closed below.
            for change in state.changes.drain() {
                if let ChangeKind::Write(data) = change.kind {
                    if let Some(entry) = state.entries.get_mut(&change.target) {
                        entry.outbound.push_back(OutboundChunk { data, written: 0 });
                    }
                }
            }

            let mut listeners: Vec<ConnectionId> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.kind == EntryKind::Listener)
                .map(|(id, _)| *id)
                .collect();
            listeners.sort();
            for id in listeners {
                self.close(&mut state, id, cause.clone());
            }

            let mut remaining: Vec<ConnectionId> = state.entries.keys().copied().collect();
            remaining.sort();
            for id in remaining {
                self.close(&mut state, id, cause.clone());
            }
        }
        self.deliver_events();

        let ReactorLoop { poll, sockets, .. } = self;
        drop(sockets);
        drop(poll);
        if cause.is_error() {
            error!(cause = %cause, "reactor stopped after failure");
        } else {
            info!("reactor stopped");
        }
    }
}
