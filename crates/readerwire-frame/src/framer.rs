use std::collections::HashMap;
use std::hash::Hash;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::accumulator::ByteAccumulator;
use crate::codec::FrameCodec;
use crate::error::Result;

/// Where a key stands in the header/body cycle.
#[derive(Debug)]
enum Stage<H> {
    AwaitingHeader,
    AwaitingBody { header: H, raw_header: Bytes },
}

/// Assembles complete messages from inbound chunks, one framing state per key.
///
/// Callers feed whatever arrived and get a message back once a full header
/// and body have been seen.
pub struct MessageFramer<K, C: FrameCodec> {
    codec: C,
    accumulator: ByteAccumulator<K>,
    stages: HashMap<K, Stage<C::Header>>,
}

impl<K: Eq + Hash + Clone, C: FrameCodec> MessageFramer<K, C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            accumulator: ByteAccumulator::new(),
            stages: HashMap::new(),
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Feed `chunk` and return the next complete message, if any.
    ///
    /// Consumes bytes from `chunk` only up to the end of the message it
    /// completes; the remainder is left for the next call. On a decode error
    /// every consumed byte stays buffered and can be recovered with
    /// [`remove`](Self::remove).
    pub fn append<B: Buf>(&mut self, key: &K, chunk: &mut B) -> Result<Option<C::Message>> {
        loop {
            if !self.stages.contains_key(key) {
                if !chunk.has_remaining() {
                    return Ok(None);
                }
                self.accumulator.begin(key.clone(), self.codec.header_len());
                self.stages.insert(key.clone(), Stage::AwaitingHeader);
            }

            let awaiting_header = matches!(self.stages.get(key), Some(Stage::AwaitingHeader));
            let Some(filled) = self.accumulator.accumulate(key, chunk)? else {
                return Ok(None);
            };

            if awaiting_header {
                let header = match self.codec.decode_header(&filled) {
                    Ok(header) => header,
                    Err(err) => {
                        self.restore(key, filled);
                        return Err(err);
                    }
                };

                let header_len = self.codec.header_len();
                let body_len = self
                    .codec
                    .message_len(&header)
                    .saturating_sub(header_len);
                trace!(body_len, "message header decoded");

                if body_len == 0 {
                    return match self.codec.assemble(header, filled.clone(), Bytes::new()) {
                        Ok(message) => {
                            self.stages.remove(key);
                            Ok(Some(message))
                        }
                        Err(err) => {
                            self.restore(key, filled);
                            Err(err)
                        }
                    };
                }

                self.accumulator.begin(key.clone(), body_len);
                self.stages.insert(
                    key.clone(),
                    Stage::AwaitingBody {
                        header,
                        raw_header: filled,
                    },
                );
                continue;
            }

            let Some(Stage::AwaitingBody { header, raw_header }) = self.stages.remove(key) else {
                return Ok(None);
            };
            match self
                .codec
                .assemble(header.clone(), raw_header.clone(), filled.clone())
            {
                Ok(message) => return Ok(Some(message)),
                Err(err) => {
                    self.stages
                        .insert(key.clone(), Stage::AwaitingBody { header, raw_header });
                    self.restore(key, filled);
                    return Err(err);
                }
            }
        }
    }

    /// Drop the framing state for `key` and return every byte it held:
    /// the header (if decoded) followed by in-progress body bytes.
    pub fn remove(&mut self, key: &K) -> Option<Bytes> {
        let stage = self.stages.remove(key);
        let partial = self.accumulator.take(key);
        if stage.is_none() && partial.is_none() {
            return None;
        }

        let mut out = BytesMut::new();
        if let Some(Stage::AwaitingBody { raw_header, .. }) = stage {
            out.extend_from_slice(&raw_header);
        }
        if let Some(partial) = partial {
            out.extend_from_slice(&partial);
        }
        Some(out.freeze())
    }

    /// Number of bytes currently held for `key`.
    pub fn buffered(&self, key: &K) -> usize {
        let header = match self.stages.get(key) {
            Some(Stage::AwaitingBody { raw_header, .. }) => raw_header.len(),
            _ => 0,
        };
        header + self.accumulator.buffered(key)
    }

    /// True when no bytes are buffered for `key`.
    pub fn is_idle(&self, key: &K) -> bool {
        self.buffered(key) == 0
    }

    pub fn active_keys(&self) -> usize {
        self.stages.len()
    }

    /// Park a completed-but-rejected region so the next `append` sees it again.
    fn restore(&mut self, key: &K, filled: Bytes) {
        self.accumulator
            .restore(key.clone(), BytesMut::from(filled.as_ref()), 0);
    }
}
