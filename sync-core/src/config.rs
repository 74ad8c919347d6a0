//! Runtime configuration.
//!
//! Defaults, then an optional TOML file, then `INCIDENT_*` environment
//! variables. Every section is optional in the file.

use crate::channel::{ChannelConfig, HeartbeatPolicy, ReconnectPolicy};
use crate::error::{Result, SyncError};
use crate::logging::{validate_level, LogConfig};
use crate::polling::PollingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_API_URL: &str = "INCIDENT_API_URL";
pub const ENV_WS_URL: &str = "INCIDENT_WS_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "INCIDENT_POLL_INTERVAL_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "INCIDENT_RECONNECT_MAX_ATTEMPTS";
pub const ENV_AUTH_TOKEN: &str = "INCIDENT_AUTH_TOKEN";
pub const ENV_WATCH_ADDR: &str = "INCIDENT_WATCH_ADDR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub polling: PollingSection,
    pub log: LogConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Realtime endpoint; defaults to `{base_url}/ws/incidents/`.
    pub ws_url: Option<String>,
    /// Static bearer token. Usually supplied through the environment.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ws_url: None,
            token: None,
        }
    }
}

impl ApiConfig {
    pub fn ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => format!("{}/ws/incidents/", self.base_url.trim_end_matches('/')),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 45_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    pub interval_ms: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub addr: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8090".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Applies `INCIDENT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.api.ws_url = Some(url);
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            self.api.token = Some(token);
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            self.polling.interval_ms = parse_number(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_MAX_ATTEMPTS) {
            self.reconnect.max_attempts = parse_number(ENV_RECONNECT_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(addr) = lookup(ENV_WATCH_ADDR) {
            self.watch.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(SyncError::Config("api.base_url must not be empty".into()));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(SyncError::Config("reconnect.initial_delay_ms must be > 0".into()));
        }
        if self.heartbeat.interval_ms == 0 || self.polling.interval_ms == 0 {
            return Err(SyncError::Config("intervals must be > 0".into()));
        }
        if self.heartbeat.timeout_ms < self.heartbeat.interval_ms {
            return Err(SyncError::Config(
                "heartbeat.timeout_ms must be at least heartbeat.interval_ms".into(),
            ));
        }
        validate_level(&self.log.level).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint: self.api.ws_url(),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            heartbeat: HeartbeatPolicy {
                interval: Duration::from_millis(self.heartbeat.interval_ms),
                timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            },
        }
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(self.polling.interval_ms),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{key}: '{raw}' is not a valid number")))
}
