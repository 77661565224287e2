use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use readerwire_frame::Message;
use readerwire_transport::ConnectionId;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput {
    conn: u64,
    peer: Option<String>,
    version: u8,
    message_type: u16,
    id: u32,
    length: u32,
    body_size: usize,
    body: String,
    timestamp: String,
}

pub fn print_message(
    message: &Message,
    conn: ConnectionId,
    peer: Option<SocketAddr>,
    format: OutputFormat,
) {
    let header = &message.header;
    let peer = peer.map(|addr| addr.to_string());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                conn: conn.as_u64(),
                peer,
                version: header.version,
                message_type: header.message_type,
                id: header.id,
                length: header.length,
                body_size: message.body.len(),
                body: body_preview(&message.body),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONN", "TYPE", "ID", "SIZE", "PEER", "BODY"])
                .add_row(vec![
                    conn.to_string(),
                    header.message_type.to_string(),
                    header.id.to_string(),
                    message.body.len().to_string(),
                    peer.unwrap_or_else(|| "-".to_string()),
                    body_preview(&message.body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} v{} type={} id={} size={} peer={} body={}",
                conn,
                header.version,
                header.message_type,
                header.id,
                message.body.len(),
                peer.as_deref().unwrap_or("-"),
                body_preview(&message.body)
            );
        }
        OutputFormat::Raw => {
            print_raw(&message.body);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary_bodies() {
        assert_eq!(body_preview(b"tag-42"), "tag-42");
        assert_eq!(body_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }
}
