//! Cache scopes
//!
//! A scope is one cache root plus the permission identifiers that guard it.
//! The store and reaper are scope-agnostic; the same code serves any number
//! of scopes declared in configuration.

use crate::access::Permission;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::store::resolve;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Filesystem subtree dedicated to one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoot {
    base: PathBuf,
}

impl CacheRoot {
    /// Create a root at `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base directory
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// Resolve a request path to a location confined to this root
    pub fn resolve(&self, request_path: &str) -> CacheResult<PathBuf> {
        resolve::resolve(&self.base, request_path)
    }
}

/// A cache root with its read/write permission pair
#[derive(Debug, Clone)]
pub struct Scope {
    name: String,
    root: CacheRoot,
    read_permission: String,
    write_permission: String,
}

impl Scope {
    /// Create a scope with default permission identifiers
    /// (`<name>:read`, `<name>:write`)
    pub fn new(name: impl Into<String>, root: CacheRoot) -> Self {
        let name = name.into();
        Self {
            read_permission: format!("{}:read", name),
            write_permission: format!("{}:write", name),
            name,
            root,
        }
    }

    /// Override the permission identifiers
    pub fn with_permissions(mut self, read: impl Into<String>, write: impl Into<String>) -> Self {
        self.read_permission = read.into();
        self.write_permission = write.into();
        self
    }

    /// Scope name as it appears in URLs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope's cache root
    pub fn root(&self) -> &CacheRoot {
        &self.root
    }

    /// Permission identifier required for the given level
    pub fn permission_id(&self, level: Permission) -> &str {
        match level {
            Permission::Read => &self.read_permission,
            Permission::Write => &self.write_permission,
        }
    }
}

/// Check that a scope name is usable as a single URL segment
fn validate_scope_name(name: &str) -> CacheResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::Internal(format!(
            "invalid scope name {:?}: use letters, digits, '-', '_' or '.'",
            name
        )))
    }
}

/// All configured scopes, by name
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: BTreeMap<String, Arc<Scope>>,
}

impl ScopeRegistry {
    /// Build the registry from configuration
    ///
    /// Scopes without an explicit root live under `<data_dir>/scopes/<name>`.
    pub fn from_config(config: &Config) -> CacheResult<Self> {
        let data_dir = config.storage.data_dir();
        let mut registry = Self::default();

        for cfg in &config.scopes {
            let root = cfg
                .root
                .clone()
                .unwrap_or_else(|| data_dir.join("scopes").join(&cfg.name));
            let mut scope = Scope::new(&cfg.name, CacheRoot::new(root));
            if cfg.read_permission.is_some() || cfg.write_permission.is_some() {
                let read = cfg
                    .read_permission
                    .clone()
                    .unwrap_or_else(|| scope.permission_id(Permission::Read).to_string());
                let write = cfg
                    .write_permission
                    .clone()
                    .unwrap_or_else(|| scope.permission_id(Permission::Write).to_string());
                scope = scope.with_permissions(read, write);
            }
            registry.insert(scope)?;
        }

        debug!("Loaded {} scope(s)", registry.len());
        Ok(registry)
    }

    /// Add a scope, rejecting duplicates and malformed names
    pub fn insert(&mut self, scope: Scope) -> CacheResult<()> {
        validate_scope_name(scope.name())?;
        if self.scopes.contains_key(scope.name()) {
            return Err(CacheError::Internal(format!(
                "scope {} declared more than once",
                scope.name()
            )));
        }
        self.scopes.insert(scope.name().to_string(), Arc::new(scope));
        Ok(())
    }

    /// Look up a scope by name
    pub fn get(&self, name: &str) -> CacheResult<Arc<Scope>> {
        self.scopes
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::ScopeNotFound(name.to_string()))
    }

    /// Iterate scopes in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Scope>> {
        self.scopes.values()
    }

    /// Number of scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether no scopes are configured
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
