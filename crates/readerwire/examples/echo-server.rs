//! Minimal echo server: frames inbound messages and sends each one back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1 4100 --type 62 --data hello --wait

use std::sync::{mpsc, Arc};

use readerwire::frame::{Message, ReaderCodec};
use readerwire::protocol::{AdapterConfig, Delivery, ProtocolAdapter, ProtocolEvent};
use readerwire::transport::{ReactorConfig, ReactorServer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = ReactorServer::new(ReactorConfig::default())?;
    let adapter = ProtocolAdapter::with_config(
        server,
        ReaderCodec::new(),
        AdapterConfig {
            delivery: Delivery::Events,
        },
    );

    let (tx, rx) = mpsc::channel::<ProtocolEvent<Message>>();
    let listener = adapter.open(
        "127.0.0.1",
        4100,
        Arc::new(move |event: ProtocolEvent<Message>| {
            let _ = tx.send(event);
        }),
    )?;
    eprintln!("Listening on {:?}", adapter.local_addr(listener));

    for event in rx {
        match event {
            ProtocolEvent::MessageReceived { conn, message, .. } => {
                eprintln!(
                    "{conn}: type {} id {} ({} body bytes)",
                    message.header.message_type,
                    message.header.id,
                    message.body.len()
                );
                adapter.send_message(conn, &message)?;
            }
            ProtocolEvent::Closed {
                conn,
                pending_received,
                cause,
                ..
            } => {
                eprintln!(
                    "{conn} closed ({cause}), {} unframed bytes",
                    pending_received.len()
                );
            }
            _ => {}
        }
    }
    Ok(())
}
