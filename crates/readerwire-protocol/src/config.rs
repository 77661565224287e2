use serde::{Deserialize, Serialize};

/// How framed messages reach the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Inbound bytes stay queued until a caller pulls with `await_message`.
    #[default]
    Await,
    /// Every complete message is framed on arrival and pushed to the
    /// connection's handler as `MessageReceived`.
    Events,
}

/// Protocol adapter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub delivery: Delivery,
}
