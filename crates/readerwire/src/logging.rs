use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Targets that follow `--log-level`; everything else is capped at `warn`.
const CRATE_TARGETS: [&str; 4] = [
    "readerwire",
    "readerwire_frame",
    "readerwire_transport",
    "readerwire_protocol",
];

fn filter(level: LogLevel) -> Targets {
    let level = level.as_filter();
    CRATE_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |targets, target| targets.with_target(*target, level),
    )
}

/// Install the stderr subscriber; reactor threads log through it as well.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(false);
    let layer = match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(filter(level)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn crate_targets_follow_requested_level() {
        let targets = filter(LogLevel::Trace);
        assert!(targets.would_enable("readerwire_transport::reactor", &Level::TRACE));
        assert!(targets.would_enable("readerwire_protocol::adapter", &Level::DEBUG));
        assert!(!targets.would_enable("mio::poll", &Level::DEBUG));
        assert!(targets.would_enable("mio::poll", &Level::WARN));
    }

    #[test]
    fn quiet_level_also_quiets_dependencies() {
        let targets = filter(LogLevel::Error);
        assert!(!targets.would_enable("readerwire_transport::reactor", &Level::WARN));
        assert!(!targets.would_enable("mio::poll", &Level::WARN));
        assert!(targets.would_enable("mio::poll", &Level::ERROR));
    }
}
