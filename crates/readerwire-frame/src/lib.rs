//! Byte accumulation and message framing for reader protocols.
//!
//! Every message on the wire is a fixed-length header followed by a body:
//! - The header carries the total message length (header included)
//! - The body is `length - header` bytes
//!
//! The [`MessageFramer`] turns arbitrarily split inbound chunks into
//! complete messages, one framing state per connection, and never drops a
//! byte when decoding fails.

pub mod accumulator;
pub mod codec;
pub mod error;
pub mod framer;

pub use accumulator::ByteAccumulator;
pub use codec::{
    encode_message, CodecConfig, FrameCodec, Message, MessageHeader, ReaderCodec,
    DEFAULT_MAX_MESSAGE_LEN, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use framer::MessageFramer;
