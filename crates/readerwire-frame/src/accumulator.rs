use std::collections::HashMap;
use std::hash::Hash;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// A partially filled target region.
#[derive(Debug)]
struct Pending {
    buf: BytesMut,
    outstanding: usize,
}

/// Fills fixed-size byte regions, one per key, from arbitrarily sized chunks.
///
/// Callers register the size they need with [`begin`](Self::begin) and then
/// feed chunks through [`accumulate`](Self::accumulate). Bytes beyond the
/// outstanding requirement are never consumed, so the caller can hand the
/// same chunk to the next stage.
#[derive(Debug)]
pub struct ByteAccumulator<K> {
    pending: HashMap<K, Pending>,
}

impl<K: Eq + Hash + Clone> ByteAccumulator<K> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a fresh `size`-byte target for `key`, replacing any previous one.
    pub fn begin(&mut self, key: K, size: usize) {
        self.pending.insert(
            key,
            Pending {
                buf: BytesMut::with_capacity(size),
                outstanding: size,
            },
        );
    }

    /// Copy as many bytes from `chunk` as the target for `key` still needs.
    ///
    /// Returns the filled buffer and forgets `key` once nothing is
    /// outstanding; otherwise keeps the partial buffer and returns `None`.
    pub fn accumulate<B: Buf>(&mut self, key: &K, chunk: &mut B) -> Result<Option<Bytes>> {
        let pending = self.pending.get_mut(key).ok_or(FrameError::NotStarted)?;

        let take = pending.outstanding.min(chunk.remaining());
        if take > 0 {
            pending.buf.put(Buf::take(&mut *chunk, take));
            pending.outstanding -= take;
        }

        if pending.outstanding > 0 {
            return Ok(None);
        }

        Ok(self.pending.remove(key).map(|done| done.buf.freeze()))
    }

    /// Put a partial buffer back so that a later `accumulate` continues it.
    pub fn restore(&mut self, key: K, partial: BytesMut, outstanding: usize) {
        self.pending.insert(
            key,
            Pending {
                buf: partial,
                outstanding,
            },
        );
    }

    /// Remove and return whatever has been accumulated for `key` so far.
    pub fn take(&mut self, key: &K) -> Option<BytesMut> {
        self.pending.remove(key).map(|pending| pending.buf)
    }

    /// Bytes still missing for `key`, if a target is registered.
    pub fn outstanding(&self, key: &K) -> Option<usize> {
        self.pending.get(key).map(|pending| pending.outstanding)
    }

    /// Bytes already collected for `key`.
    pub fn buffered(&self, key: &K) -> usize {
        self.pending.get(key).map_or(0, |pending| pending.buf.len())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for ByteAccumulator<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_exactly_when_full() {
        let mut acc = ByteAccumulator::new();
        acc.begin(1u32, 4);

        let mut first = Bytes::from_static(b"ab");
        assert!(acc.accumulate(&1, &mut first).unwrap().is_none());
        assert!(first.is_empty());
        assert_eq!(acc.outstanding(&1), Some(2));

        let mut second = Bytes::from_static(b"cd");
        let done = acc.accumulate(&1, &mut second).unwrap().unwrap();
        assert_eq!(done.as_ref(), b"abcd");
        assert!(!acc.contains(&1));
    }

    #[test]
    fn surplus_stays_in_chunk() {
        let mut acc = ByteAccumulator::new();
        acc.begin("conn", 3);

        let mut chunk = Bytes::from_static(b"xyz-rest");
        let done = acc.accumulate(&"conn", &mut chunk).unwrap().unwrap();
        assert_eq!(done.as_ref(), b"xyz");
        assert_eq!(chunk.as_ref(), b"-rest");
    }

    #[test]
    fn conservation_over_every_split() {
        let data: Vec<u8> = (0u8..32).collect();
        for a in 0..=data.len() {
            for b in a..=data.len() {
                let mut acc = ByteAccumulator::new();
                acc.begin(7u8, data.len());

                let mut out = None;
                for range in [0..a, a..b, b..data.len()] {
                    let mut chunk = Bytes::copy_from_slice(&data[range]);
                    if let Some(done) = acc.accumulate(&7, &mut chunk).unwrap() {
                        assert!(out.is_none(), "completed twice");
                        out = Some(done);
                    }
                    assert!(chunk.is_empty());
                }
                assert_eq!(out.unwrap().as_ref(), data.as_slice(), "split {a}/{b}");
            }
        }
    }

    #[test]
    fn zero_size_target_completes_without_consuming() {
        let mut acc = ByteAccumulator::new();
        acc.begin(0u8, 0);

        let mut chunk = Bytes::from_static(b"keep");
        let done = acc.accumulate(&0, &mut chunk).unwrap().unwrap();
        assert!(done.is_empty());
        assert_eq!(chunk.as_ref(), b"keep");
    }

    #[test]
    fn unregistered_key_is_rejected() {
        let mut acc: ByteAccumulator<u8> = ByteAccumulator::new();
        let mut chunk = Bytes::from_static(b"x");
        let err = acc.accumulate(&9, &mut chunk).unwrap_err();
        assert!(matches!(err, FrameError::NotStarted));
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn take_then_restore_is_lossless() {
        let mut acc = ByteAccumulator::new();
        acc.begin(1u8, 6);
        let mut chunk = Bytes::from_static(b"abc");
        assert!(acc.accumulate(&1, &mut chunk).unwrap().is_none());

        let outstanding = acc.outstanding(&1).unwrap();
        let partial = acc.take(&1).unwrap();
        assert_eq!(partial.as_ref(), b"abc");
        assert!(acc.is_empty());

        acc.restore(1, partial, outstanding);
        assert_eq!(acc.buffered(&1), 3);
        let mut rest = Bytes::from_static(b"def");
        let done = acc.accumulate(&1, &mut rest).unwrap().unwrap();
        assert_eq!(done.as_ref(), b"abcdef");
    }
}
