use anyhow::{bail, Context, Result};
use clawgate_core::SessionOptions;
use clawgate_providers::{BackendKind, BackendSettings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "clawgate.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub backend: BackendConfig,
    pub agent: String,
    pub system_prompt: Option<String>,
    pub heartbeat: HeartbeatConfig,
    pub bus: BusConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub model: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            backend: BackendConfig::default(),
            agent: "default".to_string(),
            system_prompt: None,
            heartbeat: HeartbeatConfig::default(),
            bus: BusConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Echo,
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: clawgate_bus::DEFAULT_QUEUE_CAPACITY,
            event_buffer: clawgate_bus::DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "127.0.0.1:7878".to_string(),
        }
    }
}

impl Config {
    /// Read `path`, falling back to defaults when the file does not exist.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `CLAWGATE_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(kind) = lookup("CLAWGATE_BACKEND") {
            self.backend.kind = kind
                .parse()
                .with_context(|| "Invalid CLAWGATE_BACKEND".to_string())?;
        }
        if let Some(model) = lookup("CLAWGATE_MODEL") {
            self.backend.model = model;
        }
        if let Some(endpoint) = lookup("CLAWGATE_ENDPOINT") {
            self.backend.endpoint = endpoint;
        }
        if let Some(level) = lookup("CLAWGATE_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.model.trim().is_empty() {
            bail!("backend.model must not be empty");
        }
        if self.bus.capacity == 0 {
            bail!("bus.capacity must be greater than zero");
        }
        if self.bus.event_buffer == 0 {
            bail!("bus.event_buffer must be greater than zero");
        }
        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            bail!("heartbeat.interval_secs must be greater than zero");
        }
        if self.status.enabled {
            self.status_addr()?;
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid log_level: {}", self.log_level))
    }

    pub fn status_addr(&self) -> Result<SocketAddr> {
        self.status
            .addr
            .parse()
            .with_context(|| format!("Invalid status.addr: {}", self.status.addr))
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            kind: self.backend.kind,
            endpoint: self.backend.endpoint.clone(),
            api_key: std::env::var(&self.backend.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions {
            model: self.backend.model.clone(),
            agent: self.agent.clone(),
            system_prompt: self.system_prompt.clone(),
            ..SessionOptions::default()
        };
        if self.heartbeat.enabled {
            options = options.with_heartbeat(Duration::from_secs(self.heartbeat.interval_secs));
        }
        options
    }
}
