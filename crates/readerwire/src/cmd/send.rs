use std::fs;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use readerwire_frame::{Message, ReaderCodec};
use readerwire_protocol::{ProtocolAdapter, ProtocolEvent};
use readerwire_transport::{ConnectionId, ReactorClient, ReactorConfig};
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{
    close_error, protocol_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat, config: ReactorConfig) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let body = resolve_body(&args)?;
    let message = Message::new(args.protocol_version, args.message_type, args.id, body);
    let open_timeout = config.open_timeout;

    let client =
        ReactorClient::new(config).map_err(|err| transport_error("reactor start failed", err))?;
    let adapter = ProtocolAdapter::new(client, ReaderCodec::new());

    let (tx, rx) = mpsc::channel::<ProtocolEvent<Message>>();
    let conn = adapter
        .open(
            &args.host,
            args.port,
            Arc::new(move |event: ProtocolEvent<Message>| {
                let _ = tx.send(event);
            }),
        )
        .map_err(|err| protocol_error("connect failed", err))?;
    wait_until_open(&rx, conn, open_timeout)?;

    adapter
        .send_message(conn, &message)
        .map_err(|err| protocol_error("send failed", err))?;
    debug!(%conn, bytes = message.wire_size(), "message queued");

    if args.wait {
        let reply = adapter
            .await_message(conn, Some(wait_timeout))
            .map_err(|err| protocol_error("receive failed", err))?;
        print_message(&reply, conn, adapter.peer_addr(conn), format);
    }

    adapter
        .endpoint()
        .close_and_wait(conn, false)
        .map_err(|err| transport_error("close failed", err))?;
    adapter.endpoint().shutdown();
    Ok(SUCCESS)
}

/// Block until the connect completes, or report why it never did.
fn wait_until_open(
    rx: &mpsc::Receiver<ProtocolEvent<Message>>,
    conn: ConnectionId,
    timeout: Duration,
) -> CliResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(ProtocolEvent::Opened { conn: opened, .. }) if opened == conn => return Ok(()),
            Ok(ProtocolEvent::Closed { cause, .. }) => {
                return Err(close_error("connect failed", &cause))
            }
            Ok(_) => {}
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("connect failed: no connection within {timeout:?}"),
                ))
            }
        }
    }
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), &err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args(data: Option<&str>, file: Option<PathBuf>) -> SendArgs {
        SendArgs {
            host: "127.0.0.1".to_string(),
            port: 1,
            message_type: 1,
            id: 1,
            protocol_version: 1,
            data: data.map(str::to_string),
            file,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn body_defaults_to_empty() {
        assert!(resolve_body(&args(None, None)).unwrap().is_empty());
        assert_eq!(resolve_body(&args(Some("hi"), None)).unwrap(), b"hi");
    }

    #[test]
    fn missing_body_file_is_usage_error() {
        let err = resolve_body(&args(None, Some(PathBuf::from("/nonexistent/readerwire-body"))))
            .unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
