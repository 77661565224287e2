mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;
use readerwire_transport::{ReactorConfig, DEFAULT_READ_BUFFER_SIZE};

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "readerwire", version, about = "Reader protocol transport CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Bytes taken off a socket per read.
    #[arg(
        long,
        value_name = "BYTES",
        env = "READERWIRE_READ_BUFFER_SIZE",
        default_value_t = DEFAULT_READ_BUFFER_SIZE,
        value_parser = parse_buffer_size,
        global = true
    )]
    read_buffer_size: usize,

    #[command(subcommand)]
    command: Command,
}

fn parse_buffer_size(input: &str) -> Result<usize, String> {
    match input.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}

impl Cli {
    fn reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            read_buffer_size: self.read_buffer_size,
            ..ReactorConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let reactor = cli.reactor_config();
    let result = cmd::run(cli.command, format, reactor);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
