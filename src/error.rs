//! Error types for the artifact cache
//!
//! All modules use `CacheResult<T>` as their return type.

use crate::access::Permission;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for artifact cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in the artifact cache
#[derive(Error, Debug)]
pub enum CacheError {
    // Request errors
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Authentication required for scope {0}")]
    Unauthenticated(String),

    #[error("Missing {required} permission on scope {scope}")]
    Unauthorized { scope: String, required: Permission },

    #[error("Path escapes cache root: {0}")]
    PathEscape(String),

    #[error("Invalid artifact key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Artifact key names a directory: {0}")]
    KeyIsDirectory(String),

    #[error("Artifact key passes through a stored file: {0}")]
    KeyUnderFile(String),

    #[error("Artifact exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: u64 },

    #[error("Method not implemented: {0}")]
    UnsupportedMethod(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller sent something the cache refuses, as opposed to
    /// the cache failing on its own
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ScopeNotFound(_)
                | Self::Unauthenticated(_)
                | Self::Unauthorized { .. }
                | Self::PathEscape(_)
                | Self::InvalidKey { .. }
                | Self::KeyIsDirectory(_)
                | Self::KeyUnderFile(_)
                | Self::PayloadTooLarge { .. }
                | Self::UnsupportedMethod(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ScopeNotFound(_) => Some("Declare the scope under [[scopes]] in config.toml"),
            Self::ConfigNotFound(_) => Some("Run: artifact-cache config init"),
            Self::Unauthenticated(_) => Some("Send an Authorization: Bearer <token> header"),
            _ => None,
        }
    }
}
