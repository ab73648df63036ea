use std::time::Duration;

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::error::Result;

fn default_signaling_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_reconnect_backoff_ms() -> u64 {
    3_000
}

fn default_connect_warn_after_ms() -> u64 {
    10_000
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: String::new(),
        credential: String::new(),
    }]
}

/// One STUN/TURN server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Orchestrator configuration.
///
/// Passed explicitly into session construction; there is no shared
/// module-level ICE constant, so deployments can override STUN/TURN
/// per environment via file or `CODECREW_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base WebSocket URL of the relay, e.g. `wss://relay.example.com`.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Base URL of the REST API serving session metadata.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Delay before the single scheduled reconnection attempt after an
    /// abnormal channel closure.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// How long a link may sit unconnected before the "still
    /// connecting" diagnostic is logged. Not a hard timeout.
    #[serde(default = "default_connect_warn_after_ms")]
    pub connect_warn_after_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            api_url: default_api_url(),
            ice_servers: default_ice_servers(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            connect_warn_after_ms: default_connect_warn_after_ms(),
        }
    }
}

impl SessionConfig {
    /// Load from `codecrew.toml` (optional) layered with `CODECREW_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("codecrew").required(false))
            .add_source(config::Environment::with_prefix("CODECREW").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_warn_after(&self) -> Duration {
        Duration::from_millis(self.connect_warn_after_ms)
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}
