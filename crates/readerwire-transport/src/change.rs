use std::collections::VecDeque;

use bytes::Bytes;

use crate::event::{CloseCause, ConnectionId};
use crate::socket::PendingSocket;

/// What a queued change asks the reactor to do.
#[derive(Debug)]
pub(crate) enum ChangeKind {
    /// Register a freshly bound listener or connecting stream.
    Register(PendingSocket),
    /// Append bytes to the outbound queue and switch to write interest.
    Write(Bytes),
    /// Tear the target down, reporting `cause` on its closed event.
    Close(CloseCause),
}

/// One pending mutation, produced by any thread and applied once by the reactor.
#[derive(Debug)]
pub(crate) struct ChangeRequest {
    pub target: ConnectionId,
    pub kind: ChangeKind,
    /// Bypass write-lock deferral.
    pub force: bool,
}

impl ChangeRequest {
    pub fn register(target: ConnectionId, socket: PendingSocket) -> Self {
        Self {
            target,
            kind: ChangeKind::Register(socket),
            force: false,
        }
    }

    pub fn write(target: ConnectionId, data: Bytes) -> Self {
        Self {
            target,
            kind: ChangeKind::Write(data),
            force: false,
        }
    }

    pub fn close(target: ConnectionId, force: bool) -> Self {
        Self::close_with(target, force, CloseCause::Clean)
    }

    pub fn close_with(target: ConnectionId, force: bool, cause: CloseCause) -> Self {
        Self {
            target,
            kind: ChangeKind::Close(cause),
            force,
        }
    }

    /// Requests that must wait while their target is mid-write.
    pub fn deferrable(&self) -> bool {
        !self.force && matches!(self.kind, ChangeKind::Register(_) | ChangeKind::Close(_))
    }
}

/// FIFO mailbox of change requests.
///
/// Guarded by the reactor mutex; only the reactor thread drains it.
#[derive(Debug, Default)]
pub(crate) struct ChangeQueue {
    queue: VecDeque<ChangeRequest>,
}

impl ChangeQueue {
    pub fn push(&mut self, change: ChangeRequest) {
        self.queue.push_back(change);
    }

    /// Take every queued request, oldest first.
    pub fn drain(&mut self) -> Vec<ChangeRequest> {
        self.queue.drain(..).collect()
    }

    /// Put deferred requests back ahead of anything queued since the drain.
    pub fn requeue(&mut self, deferred: Vec<ChangeRequest>) {
        for change in deferred.into_iter().rev() {
            self.queue.push_front(change);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(changes: &[ChangeRequest]) -> Vec<u64> {
        changes.iter().map(|c| c.target.0).collect()
    }

    #[test]
    fn drain_is_fifo() {
        let mut queue = ChangeQueue::default();
        queue.push(ChangeRequest::write(ConnectionId(1), Bytes::from_static(b"a")));
        queue.push(ChangeRequest::close(ConnectionId(2), false));
        queue.push(ChangeRequest::close(ConnectionId(3), true));

        let drained = queue.drain();
        assert_eq!(ids(&drained), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_goes_ahead_of_newer_requests() {
        let mut queue = ChangeQueue::default();
        queue.push(ChangeRequest::close(ConnectionId(9), false));
        queue.requeue(vec![
            ChangeRequest::close(ConnectionId(1), false),
            ChangeRequest::close(ConnectionId(2), false),
        ]);
        assert_eq!(queue.len(), 3);
        assert_eq!(ids(&queue.drain()), vec![1, 2, 9]);
    }

    #[test]
    fn only_unforced_close_and_register_defer() {
        assert!(ChangeRequest::close(ConnectionId(1), false).deferrable());
        assert!(!ChangeRequest::close(ConnectionId(1), true).deferrable());
        assert!(!ChangeRequest::write(ConnectionId(1), Bytes::new()).deferrable());
    }

    #[test]
    fn close_carries_its_cause() {
        let change = ChangeRequest::close_with(
            ConnectionId(4),
            true,
            CloseCause::Protocol("bad header".into()),
        );
        assert!(matches!(change.kind, ChangeKind::Close(CloseCause::Protocol(ref d)) if d == "bad header"));
        assert!(matches!(
            ChangeRequest::close(ConnectionId(4), false).kind,
            ChangeKind::Close(CloseCause::Clean)
        ));
    }
}
