//! Hub settings.
//!
//! Settings are read from a JSON file with every section optional, then
//! patched from the environment. Durations are written as humantime strings
//! (`"2s"`, `"30m"`).
//!
//! ```json
//! {
//!   "sources": [
//!     { "type": "tcp", "tag": "kystverket", "host": "153.44.253.27", "port": 5631 },
//!     { "type": "aisStream", "tag": "aisstream", "url": "wss://stream.aisstream.io/v0/stream",
//!       "boundingBoxes": [[[57.0, 3.0], [72.0, 32.0]]] }
//!   ],
//!   "persistence": { "flushInterval": "2s", "batchSize": 200, "failurePolicy": "drop" },
//!   "dispatch": { "tick": "1s", "chunkSize": 50 }
//! }
//! ```

use crate::model::{BoundingBox, DEFAULT_TTL_MINUTES};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "AIS_HUB_CONFIG";

/// Settings file used when `AIS_HUB_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "ais-hub.json";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Upstream AIS sources, one connector each.
    pub sources: Vec<SourceSettings>,

    /// Fixed delay between connection attempts.
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,

    /// Upper bound on opening an upstream connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// A connected upstream silent for this long is treated as dead.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    pub store: StoreSettings,
    pub persistence: PersistenceSettings,
    pub dispatch: DispatchSettings,
    pub http: HttpSettings,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            store: StoreSettings::default(),
            persistence: PersistenceSettings::default(),
            dispatch: DispatchSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

/// One upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceSettings {
    /// Raw NMEA feed over TCP, newline delimited.
    Tcp(TcpSourceSettings),
    /// Stream-provider WebSocket emitting JSON envelopes.
    AisStream(StreamSourceSettings),
}

impl SourceSettings {
    /// Tag stamped on every record this source produces.
    pub fn tag(&self) -> &str {
        match self {
            SourceSettings::Tcp(s) => &s.tag,
            SourceSettings::AisStream(s) => &s.tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSourceSettings {
    pub tag: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSourceSettings {
    pub tag: String,
    pub url: String,

    /// Usually supplied through `AISSTREAM_API_KEY` instead.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_bounding_boxes")]
    pub bounding_boxes: Vec<BoundingBox>,

    /// Provider message types to request; empty means all.
    #[serde(default)]
    pub message_types: Vec<String>,
}

fn default_bounding_boxes() -> Vec<BoundingBox> {
    vec![BoundingBox::world()]
}

/// Durable store and record lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Record time-to-live after its last update.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How often expired records are swept.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Positions kept per vessel track.
    pub track_capacity: usize,

    /// Delay between store connection attempts at startup.
    #[serde(with = "humantime_serde")]
    pub startup_retry_delay: Duration,

    /// Upper bound on a single bulk write.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_MINUTES as u64 * 60),
            sweep_interval: Duration::from_secs(30),
            track_capacity: 500,
            startup_retry_delay: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreSettings {
    /// TTL as a chrono duration for timestamp arithmetic.
    pub fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| crate::model::default_ttl())
    }
}

/// What to do with a batch whose bulk write failed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log and drop the batch. Best effort.
    #[default]
    Drop,
    /// Put the identifiers back in the pending set. At least once.
    Requeue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(2),
            batch_size: 200,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

/// Real-time dispatch and the subscriber WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
    pub chunk_size: usize,
    pub bind_addr: SocketAddr,

    /// How long one client may hold up a broadcast.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Frames buffered per client.
    pub client_queue: usize,

    /// Server name sent in the hello message.
    pub name: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            chunk_size: 50,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            send_timeout: Duration::from_secs(5),
            client_queue: 256,
            name: "ais-hub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSettings {
    pub bind_addr: SocketAddr,
    /// Maximum vessels returned by the list-all endpoint.
    pub list_limit: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            list_limit: 30_000,
        }
    }
}

impl HubSettings {
    /// Parse settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from `AIS_HUB_CONFIG` (or `ais-hub.json`), apply the process
    /// environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut settings = Self::load(Path::new(&path))?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("AIS_HUB_WS_ADDR") {
            self.dispatch.bind_addr = addr
                .parse()
                .map_err(|_| ConfigError::invalid("AIS_HUB_WS_ADDR", addr))?;
        }
        if let Some(addr) = lookup("AIS_HUB_HTTP_ADDR") {
            self.http.bind_addr = addr
                .parse()
                .map_err(|_| ConfigError::invalid("AIS_HUB_HTTP_ADDR", addr))?;
        }
        if let Some(key) = lookup("AISSTREAM_API_KEY") {
            for source in &mut self.sources {
                if let SourceSettings::AisStream(stream) = source {
                    if stream.api_key.is_empty() {
                        stream.api_key = key.clone();
                    }
                }
            }
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.batch_size == 0 {
            return Err(ConfigError::invalid("persistence.batchSize", "must be > 0"));
        }
        if self.dispatch.chunk_size == 0 {
            return Err(ConfigError::invalid("dispatch.chunkSize", "must be > 0"));
        }
        if self.dispatch.client_queue == 0 {
            return Err(ConfigError::invalid("dispatch.clientQueue", "must be > 0"));
        }
        let intervals = [
            ("reconnectDelay", self.reconnect_delay),
            ("connectTimeout", self.connect_timeout),
            ("idleTimeout", self.idle_timeout),
            ("persistence.flushInterval", self.persistence.flush_interval),
            ("dispatch.tick", self.dispatch.tick),
            ("store.sweepInterval", self.store.sweep_interval),
            ("store.ttl", self.store.ttl),
        ];
        for (key, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be non-zero"));
            }
        }
        let mut tags = std::collections::HashSet::new();
        for source in &self.sources {
            if !tags.insert(source.tag()) {
                return Err(ConfigError::invalid("sources", format!("duplicate tag {}", source.tag())));
            }
            if let SourceSettings::AisStream(stream) = source {
                if stream.api_key.is_empty() {
                    return Err(ConfigError::invalid(
                        "sources.apiKey",
                        format!("source {} has no api key", stream.tag),
                    ));
                }
            }
        }
        Ok(())
    }
}
