// Client configuration: `~/.nomad/config.toml`.
//
// Every field has a default, so a missing or partial file still yields a
// usable configuration pointing at a local backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nomad_common::types::Feed;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

/// Floor for the reconnect delay so a zero in the file cannot spin.
const MIN_RECONNECT_DELAY_MS: u64 = 250;

/// Root directory for Nomad client state: `~/.nomad/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nomad"))
}

/// Path to the config file: `~/.nomad/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the REST backend serving history snapshots.
    pub api_base_url: String,
    /// Delay between a lost live connection and the next attempt.
    pub reconnect_delay_ms: u64,
    /// Display name used when the session yields no usable name.
    pub guest_label: String,
    pub endpoints: EndpointConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".into(),
            reconnect_delay_ms: 3_000,
            guest_label: "Guest User".into(),
            endpoints: EndpointConfig::default(),
        }
    }
}

/// Live channel endpoint per feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub city_chat: String,
    pub meetup_chat: String,
    pub incidents: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            city_chat: "ws://localhost:8080/chat".into(),
            meetup_chat: "ws://localhost:8080/chat".into(),
            incidents: "ws://localhost:9091/incidents".into(),
        }
    }
}

impl SyncConfig {
    /// Load from `~/.nomad/config.toml`, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load() -> Self {
        global_config_path().and_then(|path| Self::load_from(&path).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS))
    }

    /// The REST base URL: https, or http on a loopback host.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let url = parse_url("api_base_url", &self.api_base_url)?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if is_loopback_host(&url) => Ok(url),
            _ => Err(ConfigError::InsecureUrl {
                field: "api_base_url",
                value: self.api_base_url.clone(),
                required: "https",
            }),
        }
    }

    /// The live endpoint for `feed`: wss, or ws on a loopback host.
    pub fn endpoint(&self, feed: Feed) -> Result<Url, ConfigError> {
        let (field, value) = match feed {
            Feed::CityChat => ("endpoints.city_chat", &self.endpoints.city_chat),
            Feed::MeetupChat => ("endpoints.meetup_chat", &self.endpoints.meetup_chat),
            Feed::Incidents => ("endpoints.incidents", &self.endpoints.incidents),
        };
        let url = parse_url(field, value)?;
        match url.scheme() {
            "wss" => Ok(url),
            "ws" if is_loopback_host(&url) => Ok(url),
            _ => Err(ConfigError::InsecureUrl { field, value: value.clone(), required: "wss" }),
        }
    }

    /// Check every URL so problems surface before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;
        for feed in [Feed::CityChat, Feed::MeetupChat, Feed::Incidents] {
            self.endpoint(feed)?;
        }
        Ok(())
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("invalid {field} `{value}`: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{field} `{value}` must use {required} (plaintext is allowed only for localhost)")]
    InsecureUrl { field: &'static str, value: String, required: &'static str },
}
