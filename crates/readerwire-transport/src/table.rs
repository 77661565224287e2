use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use mio::Waker;

use crate::change::{ChangeQueue, ChangeRequest};
use crate::error::{Result, TransportError};
use crate::event::ConnectionId;

/// A queued outbound chunk and how much of it already reached the socket.
#[derive(Debug)]
pub(crate) struct OutboundChunk {
    pub data: Bytes,
    pub written: usize,
}

impl OutboundChunk {
    pub fn unwritten(&self) -> &[u8] {
        &self.data[self.written..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Listener,
    Stream,
}

/// Reactor-side bookkeeping for one listening socket or connection.
#[derive(Debug)]
pub(crate) struct Entry {
    pub kind: EntryKind,
    pub listener: Option<ConnectionId>,
    pub outbound: VecDeque<OutboundChunk>,
    pub inbound: VecDeque<Bytes>,
    /// Connect/accept completed (always true for listeners once registered).
    pub opened: bool,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
    /// Signalled on inbound data, open and removal.
    pub ready: Arc<Condvar>,
}

impl Entry {
    pub fn new(kind: EntryKind, listener: Option<ConnectionId>) -> Self {
        Self {
            kind,
            listener,
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            opened: false,
            local_addr: None,
            peer_addr: None,
            ready: Arc::new(Condvar::new()),
        }
    }

    /// Concatenate and clear the inbound queue.
    pub fn drain_inbound(&mut self) -> Bytes {
        concat(self.inbound.drain(..))
    }

    /// Concatenate the unwritten part of every outbound chunk and clear the queue.
    pub fn drain_outbound(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in self.outbound.drain(..) {
            out.extend_from_slice(chunk.unwritten());
        }
        out.freeze()
    }
}

/// Join chunks, avoiding a copy for the common single-chunk case.
pub(crate) fn concat(chunks: impl IntoIterator<Item = Bytes>) -> Bytes {
    let mut iter = chunks.into_iter();
    let Some(first) = iter.next() else {
        return Bytes::new();
    };
    let Some(second) = iter.next() else {
        return first;
    };
    let mut out = BytesMut::with_capacity(first.len() + second.len());
    out.extend_from_slice(&first);
    out.extend_from_slice(&second);
    for chunk in iter {
        out.extend_from_slice(&chunk);
    }
    out.freeze()
}

/// Connections currently mid-write, counted together with their listener.
///
/// A listener is locked while any of its connections holds the lock.
#[derive(Debug, Default)]
pub(crate) struct WriteLocks {
    held: HashMap<ConnectionId, usize>,
    owners: HashMap<ConnectionId, Option<ConnectionId>>,
}

impl WriteLocks {
    /// Lock `conn` (and `listener`); returns false if it was already locked.
    pub fn lock(&mut self, conn: ConnectionId, listener: Option<ConnectionId>) -> bool {
        if self.owners.contains_key(&conn) {
            return false;
        }
        self.owners.insert(conn, listener);
        *self.held.entry(conn).or_default() += 1;
        if let Some(listener) = listener {
            *self.held.entry(listener).or_default() += 1;
        }
        true
    }

    pub fn unlock(&mut self, conn: ConnectionId) {
        let Some(listener) = self.owners.remove(&conn) else {
            return;
        };
        for id in std::iter::once(conn).chain(listener) {
            if let Some(count) = self.held.get_mut(&id) {
                *count -= 1;
                if *count == 0 {
                    self.held.remove(&id);
                }
            }
        }
    }

    pub fn is_locked(&self, id: ConnectionId) -> bool {
        self.held.contains_key(&id)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Everything guarded by the reactor mutex.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub changes: ChangeQueue,
    pub stopping: bool,
    pub entries: HashMap<ConnectionId, Entry>,
    pub write_locks: WriteLocks,
}

impl State {
    /// Remove an entry, waking anyone waiting on it.
    pub fn remove_entry(&mut self, id: ConnectionId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.write_locks.unlock(id);
        entry.ready.notify_all();
        Some(entry)
    }

    /// Connections accepted by `listener`.
    pub fn children_of(&self, listener: ConnectionId) -> Vec<ConnectionId> {
        let mut children: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.listener == Some(listener))
            .map(|(id, _)| *id)
            .collect();
        children.sort();
        children
    }
}

/// State shared between caller threads and the reactor thread.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    waker: Waker,
    next_id: AtomicU64,
}

impl Shared {
    pub fn new(waker: Waker) -> Self {
        Self {
            state: Mutex::new(State::default()),
            waker,
            next_id: AtomicU64::new(1),
        }
    }

    /// Lock the reactor state.
    ///
    /// Every mutation completes under the lock, so a panic elsewhere never
    /// leaves the tables half-updated and the guard is recovered.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether `id` was ever handed out by this reactor.
    pub fn was_issued(&self, id: ConnectionId) -> bool {
        id.0 > 0 && id.0 < self.next_id.load(Ordering::Relaxed)
    }

    /// Queue a change and wake the reactor, unless shutdown has begun.
    pub fn submit(&self, state: &mut State, change: ChangeRequest) -> Result<()> {
        if state.stopping {
            return Err(TransportError::ServiceStopped);
        }
        state.changes.push(change);
        self.wake();
        Ok(())
    }

    pub fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!(error = %err, "failed to wake reactor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_lock_covers_listener() {
        let mut locks = WriteLocks::default();
        let listener = ConnectionId(1);
        let (a, b) = (ConnectionId(2), ConnectionId(3));

        assert!(locks.lock(a, Some(listener)));
        assert!(!locks.lock(a, Some(listener)));
        assert!(locks.lock(b, Some(listener)));
        assert!(locks.is_locked(listener));

        locks.unlock(a);
        assert!(!locks.is_locked(a));
        assert!(locks.is_locked(listener));

        locks.unlock(b);
        assert!(!locks.is_locked(listener));
        assert!(locks.is_empty());
    }

    #[test]
    fn unlock_of_unlocked_is_noop() {
        let mut locks = WriteLocks::default();
        locks.unlock(ConnectionId(5));
        assert!(locks.is_empty());
    }

    #[test]
    fn residue_drains_preserve_order() {
        let mut entry = Entry::new(EntryKind::Stream, None);
        entry.inbound.push_back(Bytes::from_static(b"ab"));
        entry.inbound.push_back(Bytes::from_static(b"cd"));
        entry.outbound.push_back(OutboundChunk {
            data: Bytes::from_static(b"12345"),
            written: 3,
        });
        entry.outbound.push_back(OutboundChunk {
            data: Bytes::from_static(b"67"),
            written: 0,
        });

        assert_eq!(entry.drain_inbound().as_ref(), b"abcd");
        assert_eq!(entry.drain_outbound().as_ref(), b"4567");
        assert!(entry.inbound.is_empty() && entry.outbound.is_empty());
    }

    #[test]
    fn concat_single_chunk_is_passthrough() {
        let chunk = Bytes::from_static(b"only");
        assert_eq!(concat([chunk.clone()]), chunk);
        assert!(concat(Vec::<Bytes>::new()).is_empty());
    }

    #[test]
    fn children_are_listed_in_id_order() {
        let mut state = State::default();
        let listener = ConnectionId(1);
        state
            .entries
            .insert(listener, Entry::new(EntryKind::Listener, None));
        for id in [4, 2, 3] {
            state
                .entries
                .insert(ConnectionId(id), Entry::new(EntryKind::Stream, Some(listener)));
        }
        state
            .entries
            .insert(ConnectionId(9), Entry::new(EntryKind::Stream, None));

        assert_eq!(
            state.children_of(listener),
            vec![ConnectionId(2), ConnectionId(3), ConnectionId(4)]
        );
        assert!(state.remove_entry(ConnectionId(3)).is_some());
        assert!(state.remove_entry(ConnectionId(3)).is_none());
    }
}
