use std::path::PathBuf;

use clap::{Args, Subcommand};
use readerwire_transport::ReactorConfig;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print received messages.
    Listen(ListenArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, reactor: ReactorConfig) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format, reactor),
        Command::Send(args) => send::run(args, format, reactor),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    pub host: String,
    /// Port to bind (0 picks a free port).
    pub port: u16,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send every received message back to its connection.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Host to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Message type (10 bits).
    #[arg(long = "type", short = 't', default_value = "1")]
    pub message_type: u16,
    /// Message id.
    #[arg(long, default_value = "1")]
    pub id: u32,
    /// Protocol version.
    #[arg(long = "protocol-version", default_value = "1")]
    pub protocol_version: u8,
    /// Raw string body.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read body from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one response message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
