use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Header: rsvd/version/type (2) + length (4) + id (4) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Default maximum total message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

const VERSION_SHIFT: u16 = 10;
const VERSION_MASK: u16 = 0x07;
const TYPE_MASK: u16 = 0x03FF;

/// Describes how a protocol family turns header bytes into a message length
/// and header-plus-body bytes into a message.
///
/// The framer only relies on the header being a fixed number of bytes from
/// which the total message length can be decoded. Codecs are moved into
/// framers shared across threads, hence the `Send` bounds.
pub trait FrameCodec: Send + 'static {
    type Header: Clone + fmt::Debug + Send + 'static;
    type Message: Send + 'static;

    /// Fixed number of header bytes.
    fn header_len(&self) -> usize;

    /// Decode a complete header.
    fn decode_header(&self, src: &[u8]) -> Result<Self::Header>;

    /// Total declared length (header included) of the message.
    fn message_len(&self, header: &Self::Header) -> usize;

    /// Build the message from its decoded header and complete body.
    fn assemble(&self, header: Self::Header, raw_header: Bytes, body: Bytes)
        -> Result<Self::Message>;

    /// Serialize a message into `dst`.
    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<()>;
}

/// Decoded reader-protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub message_type: u16,
    /// Total message length, header included.
    pub length: u32,
    pub id: u32,
}

impl MessageHeader {
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }
}

/// A framed reader-protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Bytes,
}

impl Message {
    /// Create a message, deriving the header length from the body.
    pub fn new(version: u8, message_type: u16, id: u32, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let length = (HEADER_SIZE + body.len()).min(u32::MAX as usize) as u32;
        Self {
            header: MessageHeader {
                version,
                message_type,
                length,
                id,
            },
            body,
        }
    }

    /// The total wire size of this message (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Configuration for [`ReaderCodec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Protocol versions accepted on decode and encode.
    pub supported_versions: Vec<u8>,
    /// Maximum total message size in bytes. Default: 16 MiB.
    pub max_message_len: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            supported_versions: vec![1, 2],
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// Codec for the header layout shared by the reader protocol families.
///
/// Wire format:
/// ```text
/// ┌──────┬─────────┬──────────┬──────────────┬──────────┬──────────────────┐
/// │ rsvd │ version │ type     │ length       │ id       │ body             │
/// │ 3b   │ 3b      │ 10b      │ (4B BE)      │ (4B BE)  │ (length - 10 B)  │
/// └──────┴─────────┴──────────┴──────────────┴──────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReaderCodec {
    config: CodecConfig,
}

impl ReaderCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    fn check_version(&self, version: u8) -> Result<()> {
        if self.config.supported_versions.contains(&version) {
            Ok(())
        } else {
            Err(FrameError::UnsupportedVersion(version))
        }
    }
}

impl FrameCodec for ReaderCodec {
    type Header = MessageHeader;
    type Message = Message;

    fn header_len(&self) -> usize {
        HEADER_SIZE
    }

    fn decode_header(&self, mut src: &[u8]) -> Result<MessageHeader> {
        if src.len() < HEADER_SIZE {
            return Err(FrameError::InvalidLength {
                declared: src.len(),
                header_len: HEADER_SIZE,
            });
        }

        let first = src.get_u16();
        let version = ((first >> VERSION_SHIFT) & VERSION_MASK) as u8;
        let message_type = first & TYPE_MASK;
        let length = src.get_u32();
        let id = src.get_u32();

        self.check_version(version)?;

        let declared = length as usize;
        if declared < HEADER_SIZE {
            return Err(FrameError::InvalidLength {
                declared,
                header_len: HEADER_SIZE,
            });
        }
        if declared > self.config.max_message_len {
            return Err(FrameError::MessageTooLarge {
                size: declared,
                max: self.config.max_message_len,
            });
        }

        Ok(MessageHeader {
            version,
            message_type,
            length,
            id,
        })
    }

    fn message_len(&self, header: &MessageHeader) -> usize {
        header.length as usize
    }

    fn assemble(&self, header: MessageHeader, _raw_header: Bytes, body: Bytes) -> Result<Message> {
        if body.len() != header.body_len() {
            return Err(FrameError::InvalidLength {
                declared: header.length as usize,
                header_len: HEADER_SIZE,
            });
        }
        Ok(Message { header, body })
    }

    fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()> {
        let header = &message.header;
        self.check_version(header.version)?;

        if header.message_type > TYPE_MASK {
            return Err(FrameError::Encode(format!(
                "message type {} does not fit in 10 bits",
                header.message_type
            )));
        }

        let total = message.wire_size();
        if total > self.config.max_message_len || total > u32::MAX as usize {
            return Err(FrameError::MessageTooLarge {
                size: total,
                max: self.config.max_message_len.min(u32::MAX as usize),
            });
        }

        dst.reserve(total);
        dst.put_u16((u16::from(header.version) & VERSION_MASK) << VERSION_SHIFT | header.message_type);
        dst.put_u32(total as u32);
        dst.put_u32(header.id);
        dst.put_slice(&message.body);
        Ok(())
    }
}

/// Encode a message with the default codec into a fresh buffer.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(message.wire_size());
    ReaderCodec::new().encode(message, &mut buf)?;
    Ok(buf.freeze())
}
