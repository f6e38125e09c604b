//! Client configuration.
//!
//! Layers, lowest first: built-in defaults, global `~/.trainsync/config.toml`,
//! local `./.trainsyncrc`, `TRAINSYNC_*` environment variables, then
//! whatever the caller merges on top (command-line flags).

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 500;
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Reconnect section of a config layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectLayer {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
}

/// One configuration layer. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectLayer,
}

impl ConfigLayer {
    pub fn load_from_file(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save_to_file(&self, path: &Path) -> SyncResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(format!("failed to serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Config(format!("failed to create directory: {e}")))?;
        }
        std::fs::write(path, content).map_err(|e| SyncError::Config(format!("failed to write file: {e}")))
    }

    /// Layer built from `TRAINSYNC_*` variables as returned by `lookup`.
    pub fn from_env_with<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let request_timeout_ms = match lookup("TRAINSYNC_REQUEST_TIMEOUT_MS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                SyncError::Config(format!("TRAINSYNC_REQUEST_TIMEOUT_MS must be an integer, got '{raw}'"))
            })?),
            None => None,
        };
        Ok(Self {
            base_url: lookup("TRAINSYNC_BASE_URL"),
            ws_url: lookup("TRAINSYNC_WS_URL"),
            request_timeout_ms,
            reconnect: ReconnectLayer::default(),
            cache_path: lookup("TRAINSYNC_CACHE_PATH").map(PathBuf::from),
            log_level: lookup("TRAINSYNC_LOG_LEVEL"),
        })
    }

    pub fn from_env() -> SyncResult<Self> {
        Self::from_env_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Values set in `other` win.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref base_url) = other.base_url {
            self.base_url = Some(base_url.clone());
        }
        if let Some(ref ws_url) = other.ws_url {
            self.ws_url = Some(ws_url.clone());
        }
        if let Some(ms) = other.request_timeout_ms {
            self.request_timeout_ms = Some(ms);
        }
        if let Some(n) = other.reconnect.max_attempts {
            self.reconnect.max_attempts = Some(n);
        }
        if let Some(ms) = other.reconnect.initial_backoff_ms {
            self.reconnect.initial_backoff_ms = Some(ms);
        }
        if let Some(ref path) = other.cache_path {
            self.cache_path = Some(path.clone());
        }
        if let Some(ref level) = other.log_level {
            self.log_level = Some(level.clone());
        }
    }
}

/// Bounded reconnect schedule for telemetry streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl ReconnectPolicy {
    pub const NEVER: Self = Self { max_attempts: 0, initial_backoff: Duration::ZERO };

    /// Delay before reconnect attempt `attempt` (1-based), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(MAX_RECONNECT_BACKOFF)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
        }
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub cache_path: PathBuf,
    pub log_level: Option<String>,
}

/// `http` becomes `ws` and `https` becomes `wss`.
pub fn derive_ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

impl SyncConfig {
    pub fn default_global_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".trainsync").join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".trainsyncrc")
    }

    pub fn default_cache_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trainsync")
            .join("step_cache.json")
    }

    /// Merge global and local files, then the environment.
    ///
    /// Missing files are skipped; a file that exists but does not parse is an error.
    pub fn discover_layers() -> SyncResult<ConfigLayer> {
        let mut layer = ConfigLayer::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.exists() {
                debug!(path = %path.display(), "loading config file");
                layer.merge(&ConfigLayer::load_from_file(&path)?);
            }
        }
        layer.merge(&ConfigLayer::from_env()?);
        Ok(layer)
    }

    /// Discover all layers, put `overrides` on top and resolve.
    pub fn load(overrides: &ConfigLayer) -> SyncResult<Self> {
        let mut layer = Self::discover_layers()?;
        layer.merge(overrides);
        Self::resolve(&layer)
    }

    pub fn resolve(layer: &ConfigLayer) -> SyncResult<Self> {
        let base_url = layer
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let ws_url = layer
            .ws_url
            .as_deref()
            .map_or_else(|| derive_ws_url(&base_url), |u| u.trim().trim_end_matches('/').to_string());
        let config = Self {
            ws_url,
            request_timeout: Duration::from_millis(layer.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)),
            reconnect: ReconnectPolicy {
                max_attempts: layer.reconnect.max_attempts.unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
                initial_backoff: Duration::from_millis(
                    layer.reconnect.initial_backoff_ms.unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
                ),
            },
            cache_path: layer.cache_path.clone().unwrap_or_else(Self::default_cache_path),
            log_level: layer.log_level.clone(),
            base_url,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.base_url.is_empty() {
            return Err(SyncError::Config("base_url must not be empty".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SyncError::Config(format!("base_url must be http(s), got '{}'", self.base_url)));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SyncError::Config(format!("ws_url must be ws(s), got '{}'", self.ws_url)));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::Config("request_timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_BASE_URL),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect: ReconnectPolicy::default(),
            cache_path: Self::default_cache_path(),
            log_level: None,
        }
    }
}
