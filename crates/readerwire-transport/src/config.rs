use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default size of the per-read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Reactor tuning handed over by the configuration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Maximum bytes taken off a socket per read. Default: 1 KiB.
    pub read_buffer_size: usize,
    /// Readiness events collected per multiplexer wait.
    pub event_capacity: usize,
    /// How long `connect` waits for the opened event.
    #[serde(with = "millis")]
    pub open_timeout: Duration,
    /// How long `close_and_wait` waits for the closed event.
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    /// Name given to the reactor thread.
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_capacity: 256,
            open_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            thread_name: "readerwire-reactor".to_string(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReactorConfig::default();
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.open_timeout, Duration::from_secs(5));
    }

    #[test]
    fn deserializes_millisecond_timeouts() {
        let config: ReactorConfig =
            serde_json::from_str(r#"{"read_buffer_size": 64, "close_timeout": 250}"#).unwrap();
        assert_eq!(config.read_buffer_size, 64);
        assert_eq!(config.close_timeout, Duration::from_millis(250));
        assert_eq!(config.open_timeout, Duration::from_secs(5));
    }
}
