//! Reactor-driven transport and message framing for reader protocols.
//!
//! readerwire multiplexes many non-blocking TCP connections on one reactor
//! thread per client or server and turns their byte streams into
//! header-plus-body messages without ever dropping a byte.
//!
//! # Crate Structure
//!
//! - [`frame`]: byte accumulation, message framing and the reader header codec
//! - [`transport`]: the I/O reactor, its events and the client/server facades
//! - [`protocol`]: the protocol adapter that frames messages on top of a facade

/// Re-export frame types.
pub mod frame {
    pub use readerwire_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use readerwire_transport::*;
}

/// Re-export protocol adapter types.
pub mod protocol {
    pub use readerwire_protocol::*;
}
