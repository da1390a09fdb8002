//! Configuration schema for the artifact cache
//!
//! Configuration is stored at `~/.config/artifact-cache/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Retention reaper settings
    pub reaper: ReaperConfig,

    /// Access gate settings
    pub access: AccessConfig,

    /// Cache scopes
    pub scopes: Vec<ScopeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            reaper: ReaperConfig::default(),
            access: AccessConfig::default(),
            scopes: vec![ScopeConfig {
                name: "global".to_string(),
                ..ScopeConfig::default()
            }],
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable audit logging
    pub audit_log: bool,

    /// Audit log location (default: state dir)
    pub audit_log_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            audit_log: true,
            audit_log_path: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Externally visible base URL used for browse hrefs
    pub public_url: Option<String>,

    /// Largest accepted artifact in MB (0 = unlimited)
    pub max_artifact_mb: u64,
}

impl ServerConfig {
    /// Base URL without a trailing slash
    pub fn public_url(&self) -> String {
        let url = self
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind));
        url.trim_end_matches('/').to_string()
    }

    /// Upload limit in bytes, if any
    pub fn max_artifact_bytes(&self) -> Option<u64> {
        (self.max_artifact_mb > 0).then(|| self.max_artifact_mb.saturating_mul(1024 * 1024))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: None,
            max_artifact_mb: 0,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for scope roots (default: platform data dir)
    pub data_dir: Option<PathBuf>,

    /// Where uploads are staged before the atomic rename
    /// (default: `<data_dir>/scratch`)
    pub scratch_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("artifact-cache")
        })
    }

    /// Effective scratch directory
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("scratch"))
    }
}

/// Retention reaper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Delete files not modified for more than N days
    pub expiration_days: u32,

    /// Run the reaper every N hours while serving (0 = disabled)
    pub interval_hours: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            expiration_days: 7,
            interval_hours: 24,
        }
    }
}

/// How requests are authorized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Every request is allowed
    #[default]
    Open,
    /// Bearer tokens from `access.tokens`
    Token,
}

/// Access gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Gate implementation
    pub mode: AccessMode,

    /// Static bearer tokens (token mode)
    pub tokens: Vec<TokenConfig>,
}

/// One bearer token and the permission identifiers it holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Name used in logs
    pub name: String,

    /// Secret presented as `Authorization: Bearer <token>`
    pub token: String,

    /// Permission identifiers, e.g. `global:write` or `*:read`
    pub grants: Vec<String>,
}

/// One cache scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Scope name, used as the first URL segment
    pub name: String,

    /// Cache root (default: `<data_dir>/scopes/<name>`)
    pub root: Option<PathBuf>,

    /// Permission identifier for reads (default: `<name>:read`)
    pub read_permission: Option<String>,

    /// Permission identifier for writes (default: `<name>:write`)
    pub write_permission: Option<String>,
}
