//! Configuration system for webtop
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/webtop/config.toml
//! - Linux: ~/.config/webtop/config.toml
//! - Windows: %APPDATA%/webtop/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::types::{BackendKind, MountConfig};
use crate::{DEFAULT_LONG_RECONNECT_MS, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_SHORT_RECONNECT_MS};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection channel settings
    pub connection: ConnectionConfig,
    /// Filesystem settings
    pub vfs: VfsConfig,
}

/// Which channel strategy carries remote calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One HTTP exchange per call
    #[default]
    Http,
    /// Persistent multiplexed WebSocket
    Socket,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Root URI of the application server
    pub root_uri: String,
    /// Filesystem endpoint URI (file URLs are built under it)
    pub fs_uri: String,
    pub transport: TransportKind,
    /// No network backend at all; every remote call is refused
    pub standalone: bool,
    /// Request timeout in seconds for request/response exchanges (0 = none)
    pub request_timeout_secs: u64,
    pub socket: SocketConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            root_uri: "http://localhost:8000/".into(),
            fs_uri: "http://localhost:8000/FS".into(),
            transport: TransportKind::Http,
            standalone: false,
            request_timeout_secs: 30,
            socket: SocketConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Socket endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Port override (defaults to the root URI's port)
    pub port: Option<u16>,
    /// Path of the socket endpoint
    pub path: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: None,
            path: "/".into(),
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub short_delay_ms: u64,
    /// Delay before every later retry
    pub long_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            short_delay_ms: DEFAULT_SHORT_RECONNECT_MS,
            long_delay_ms: DEFAULT_LONG_RECONNECT_MS,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::from_millis(self.short_delay_ms)
        } else {
            Duration::from_millis(self.long_delay_ms)
        }
    }
}

/// Filesystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Largest payload accepted by `upload`, in bytes
    pub max_upload_size: u64,
    pub mounts: Vec<MountConfig>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            mounts: vec![
                MountConfig::new("home", "home:///", BackendKind::Server),
                MountConfig::new("osjs", "osjs:///", BackendKind::Server).read_only(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        match Self::default_path() {
            Some(path) => self.save_to(&path),
            None => Err(ConfigError::NoConfigDir),
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "webtop", "webtop")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// WebSocket URL derived from the root URI and socket settings
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.connection.root_uri)
            .map_err(|e| ConfigError::Parse(format!("root_uri: {}", e)))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Parse(format!("cannot use {} scheme", scheme)))?;

        if let Some(port) = self.connection.socket.port {
            url.set_port(Some(port))
                .map_err(|_| ConfigError::Parse("root_uri cannot carry a port".into()))?;
        }
        url.set_path(&self.connection.socket.path);
        Ok(url)
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("No configuration directory available")]
    NoConfigDir,
}
