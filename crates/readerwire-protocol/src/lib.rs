//! Message framing on top of a reactor endpoint.
//!
//! The [`ProtocolAdapter`] wraps a [`ReactorClient`](readerwire_transport::ReactorClient)
//! or [`ReactorServer`](readerwire_transport::ReactorServer) and a
//! [`FrameCodec`](readerwire_frame::FrameCodec), turning raw inbound bytes into
//! complete messages either on demand ([`ProtocolAdapter::await_message`]) or
//! as events ([`Delivery::Events`]).

pub mod adapter;
pub mod config;
pub mod error;
pub mod event;

pub use adapter::ProtocolAdapter;
pub use config::{AdapterConfig, Delivery};
pub use error::{ProtocolError, Result};
pub use event::{ProtocolEvent, ProtocolHandler};
