//! Client Configuration
//!
//! Figment-deserialized from defaults / seer.toml / env vars.
//!
//! Two equivalent ways to configure:
//!
//!   seer.toml:       [channel]
//!                    reconnect_attempts = 5
//!
//!   env var:         SEER_CHANNEL__RECONNECT_ATTEMPTS=5   (double underscore = nesting)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub negotiation: NegotiationFileConfig,
}

/// Backend endpoints and credential (lives under `[backend]` in seer.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Websocket endpoint. Defaults to the base URL with the scheme swapped
    /// to ws(s) and `/ws` appended.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            token: None,
        }
    }
}

/// Channel reconnect tunables (lives under `[channel]` in seer.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// Session negotiation tunables (lives under `[negotiation]` in seer.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiationFileConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_negotiation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NegotiationFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_negotiation_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:4000".to_string()
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_poll_interval_secs() -> u64 {
    3
}
fn default_negotiation_timeout_secs() -> u64 {
    300
}

/// Build a figment that layers: defaults → seer.toml → SEER_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SEER_BACKEND__BASE_URL=https://api.example.com`  →  `backend.base_url`
///   `SEER_NEGOTIATION__POLL_INTERVAL_SECS=5`          →  `negotiation.poll_interval_secs`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("SEER_").split("__"))
}

/// Reconnect policy for the transport channel: bounded attempts with a fixed
/// delay between them.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub ws_url: String,
    pub token: String,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
    pub negotiation_timeout: Duration,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let base_url = fc.backend.base_url.trim_end_matches('/').to_string();
        let ws_url = fc
            .backend
            .ws_url
            .clone()
            .unwrap_or_else(|| derive_ws_url(&base_url));
        Self {
            base_url,
            ws_url,
            token: fc.backend.token.clone().unwrap_or_default(),
            reconnect: ReconnectPolicy {
                max_attempts: fc.channel.reconnect_attempts,
                delay: Duration::from_millis(fc.channel.reconnect_delay_ms),
            },
            poll_interval: Duration::from_secs(fc.negotiation.poll_interval_secs),
            negotiation_timeout: Duration::from_secs(fc.negotiation.timeout_secs),
        }
    }
}

fn derive_ws_url(base_url: &str) -> String {
    let swapped = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{swapped}/ws")
}
