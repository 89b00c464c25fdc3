use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const AUTH_URL: &str = "https://id.twitch.tv/oauth2/token";
pub const STREAMS_URL: &str = "https://api.twitch.tv/helix/streams";
pub const PAGE_SIZE: u32 = 100;
pub const BACKOFF_INTERVAL_SECS: u64 = 5;
pub const BACKOFF_CEILING_SECS: u64 = 30;
pub const USER_AGENT: &str = concat!("twitch-snapshot/", env!("CARGO_PKG_VERSION"));

/// `[twitch]` section of the configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    /// OAuth client-credentials token endpoint
    pub auth_url: String,

    /// Helix streams listing endpoint
    pub streams_url: String,

    /// Rows requested per page (`first=`)
    pub page_size: u32,

    /// Added to the accumulated wait after every failed request
    pub backoff_interval_secs: u64,

    /// A call gives up once the accumulated wait reaches this value
    pub backoff_ceiling_secs: u64,
}

impl TwitchConfig {
    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_interval_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            auth_url: AUTH_URL.to_string(),
            streams_url: STREAMS_URL.to_string(),
            page_size: PAGE_SIZE,
            backoff_interval_secs: BACKOFF_INTERVAL_SECS,
            backoff_ceiling_secs: BACKOFF_CEILING_SECS,
        }
    }
}
