use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use readerwire_frame::{Message, ReaderCodec};
use readerwire_protocol::{AdapterConfig, Delivery, ProtocolAdapter, ProtocolEvent};
use readerwire_transport::{ReactorConfig, ReactorServer};
use tracing::{debug, info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{protocol_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat, config: ReactorConfig) -> CliResult<i32> {
    let server =
        ReactorServer::new(config).map_err(|err| transport_error("reactor start failed", err))?;
    let adapter = ProtocolAdapter::with_config(
        server,
        ReaderCodec::new(),
        AdapterConfig {
            delivery: Delivery::Events,
        },
    );

    let (tx, rx) = mpsc::channel::<ProtocolEvent<Message>>();
    let listener = adapter
        .open(
            &args.host,
            args.port,
            Arc::new(move |event: ProtocolEvent<Message>| {
                let _ = tx.send(event);
            }),
        )
        .map_err(|err| protocol_error("bind failed", err))?;
    if let Some(addr) = adapter.local_addr(listener) {
        info!(%addr, "waiting for connections");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        match event {
            ProtocolEvent::Opened { conn, .. } => {
                info!(%conn, peer = ?adapter.peer_addr(conn), "connection accepted");
            }
            ProtocolEvent::MessageReceived { conn, message, .. } => {
                print_message(&message, conn, adapter.peer_addr(conn), format);
                if args.echo {
                    if let Err(err) = adapter.send_message(conn, &message) {
                        warn!(%conn, error = %err, "echo failed");
                    }
                }

                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    // Non-forced close lets a queued echo drain first.
                    if let Err(err) = adapter.endpoint().close_and_wait(conn, false) {
                        debug!(%conn, error = %err, "close after last message failed");
                    }
                    break;
                }
            }
            ProtocolEvent::FramingFailed { conn, error, .. } => {
                warn!(%conn, error = %error, "dropping connection with malformed input");
                if let Err(err) = adapter.abort(conn, &error) {
                    debug!(%conn, error = %err, "close after framing failure failed");
                }
            }
            ProtocolEvent::Closed {
                conn,
                pending_received,
                cause,
                ..
            } => {
                if pending_received.is_empty() {
                    info!(%conn, %cause, "connection closed");
                } else {
                    warn!(
                        %conn,
                        %cause,
                        pending = pending_received.len(),
                        "connection closed with unframed bytes"
                    );
                }
            }
            ProtocolEvent::Sent { .. } | ProtocolEvent::DataReceived { .. } => {}
        }
    }

    adapter.endpoint().shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
