//! Single-threaded non-blocking socket reactor.
//!
//! One reactor thread owns every socket of a client or server instance:
//! - Caller threads only queue change requests (register, write, close)
//! - The reactor applies them, polls with `mio` and performs all socket I/O
//! - Inbound bytes are queued per connection for [`Reactor::await_data`]
//! - Lifecycle and data events are delivered to an [`EventHandler`]
//!
//! Every closed connection reports the bytes still queued in either
//! direction on its [`ClosedEvent`], so nothing is lost silently.
//!
//! [`ReactorClient`] and [`ReactorServer`] bind a handler per connection and
//! implement [`Endpoint`], the surface used by the protocol layer.

mod change;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod reactor;
pub mod server;
mod socket;
mod table;
pub mod traits;

pub use client::ReactorClient;
pub use config::{ReactorConfig, DEFAULT_READ_BUFFER_SIZE};
pub use dispatch::HandlerRegistry;
pub use error::{Result, TransportError};
pub use event::{CloseCause, ClosedEvent, ConnectionId, Event, EventHandler};
pub use reactor::Reactor;
pub use server::ReactorServer;
pub use traits::Endpoint;
