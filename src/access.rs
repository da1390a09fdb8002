//! Access gate for cache scopes
//!
//! Two permission levels exist per scope: `Read` and `Write`, where holding
//! `Write` implies `Read`. Every request is checked before the store or
//! lister is touched.

use crate::config::schema::{AccessConfig, AccessMode, TokenConfig};
use crate::error::{CacheError, CacheResult};
use crate::scope::Scope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Permission level required for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Fetch artifacts and browse listings
    Read,
    /// Store artifacts (implies read)
    Write,
}

impl Permission {
    /// Whether holding `self` satisfies a check for `required`
    pub fn implies(self, required: Permission) -> bool {
        match self {
            Self::Write => true,
            Self::Read => required == Self::Read,
        }
    }

    /// Parse from the suffix of a grant string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Identity presented with a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Principal {
    /// No credentials supplied
    #[default]
    Anonymous,
    /// Bearer token from the Authorization header
    Bearer(String),
}

impl Principal {
    /// Extract a principal from an Authorization header value
    pub fn from_authorization(header: Option<&str>) -> Self {
        header
            .and_then(|value| value.trim_start().split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .map(|token| Self::Bearer(token.to_string()))
            .unwrap_or_default()
    }
}

/// Decides whether a principal may read or write a scope
///
/// A denial must be returned before any filesystem access happens.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Succeeds if `principal` holds `required` on `scope`
    async fn check_permission(
        &self,
        principal: &Principal,
        scope: &Scope,
        required: Permission,
    ) -> CacheResult<()>;

    /// Human-readable gate name for logs
    fn gate_name(&self) -> &'static str;
}

/// Gate that allows every request
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

#[async_trait]
impl AccessGate for OpenGate {
    async fn check_permission(
        &self,
        _principal: &Principal,
        _scope: &Scope,
        _required: Permission,
    ) -> CacheResult<()> {
        Ok(())
    }

    fn gate_name(&self) -> &'static str {
        "open"
    }
}

/// A permission identifier held by a token
///
/// `*:read` and `*:write` match every scope.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Grant {
    Any(Permission),
    Exact(String),
}

impl Grant {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(level) = s.strip_prefix("*:") {
            return Permission::parse(level).map(Self::Any);
        }
        let (scope, level) = s.rsplit_once(':')?;
        if scope.is_empty() || level.is_empty() {
            return None;
        }
        Some(Self::Exact(s.to_string()))
    }

    fn covers(&self, scope: &Scope, required: Permission) -> bool {
        match self {
            Self::Any(level) => level.implies(required),
            Self::Exact(id) => {
                id == scope.permission_id(required)
                    || (required == Permission::Read && id == scope.permission_id(Permission::Write))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct TokenEntry {
    name: String,
    token: String,
    grants: Vec<Grant>,
}

/// Gate backed by static bearer tokens from configuration
#[derive(Debug, Clone, Default)]
pub struct TokenGate {
    tokens: Vec<TokenEntry>,
}

impl TokenGate {
    /// Build a gate from configured tokens, rejecting malformed grants
    pub fn from_config(tokens: &[TokenConfig]) -> CacheResult<Self> {
        let mut entries = Vec::with_capacity(tokens.len());
        for cfg in tokens {
            if cfg.token.is_empty() {
                return Err(CacheError::Internal(format!(
                    "access token {} has an empty secret",
                    cfg.name
                )));
            }
            let grants = cfg
                .grants
                .iter()
                .map(|g| {
                    Grant::parse(g).ok_or_else(|| {
                        CacheError::Internal(format!(
                            "access token {}: malformed grant {:?} (expected <permission>:<level> or *:read|write)",
                            cfg.name, g
                        ))
                    })
                })
                .collect::<CacheResult<Vec<_>>>()?;
            entries.push(TokenEntry {
                name: cfg.name.clone(),
                token: cfg.token.clone(),
                grants,
            });
        }
        Ok(Self { tokens: entries })
    }

    fn lookup(&self, presented: &str) -> Option<&TokenEntry> {
        self.tokens
            .iter()
            .find(|entry| bool::from(entry.token.as_bytes().ct_eq(presented.as_bytes())))
    }
}

#[async_trait]
impl AccessGate for TokenGate {
    async fn check_permission(
        &self,
        principal: &Principal,
        scope: &Scope,
        required: Permission,
    ) -> CacheResult<()> {
        let token = match principal {
            Principal::Anonymous => {
                return Err(CacheError::Unauthenticated(scope.name().to_string()))
            }
            Principal::Bearer(token) => token,
        };

        let Some(entry) = self.lookup(token) else {
            debug!("Unknown bearer token for scope {}", scope.name());
            return Err(CacheError::Unauthenticated(scope.name().to_string()));
        };

        if entry.grants.iter().any(|g| g.covers(scope, required)) {
            debug!(
                "Token {} granted {} on {} ({})",
                entry.name,
                required,
                scope.name(),
                scope.permission_id(required)
            );
            Ok(())
        } else {
            Err(CacheError::Unauthorized {
                scope: scope.name().to_string(),
                required,
            })
        }
    }

    fn gate_name(&self) -> &'static str {
        "token"
    }
}

/// Create the gate selected by configuration
pub fn create_gate(config: &AccessConfig) -> CacheResult<Box<dyn AccessGate>> {
    match config.mode {
        AccessMode::Open => Ok(Box::new(OpenGate)),
        AccessMode::Token => Ok(Box::new(TokenGate::from_config(&config.tokens)?)),
    }
}
