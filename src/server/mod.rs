//! HTTP surface of the artifact cache
//!
//! | Route | Verbs | Permission |
//! |-------|-------|------------|
//! | `/{scope}/repository[/{*key}]` | GET, PUT (others: 501) | read / write |
//! | `/{scope}/browse[/{*path}]` | GET | read |
//! | `/health` | GET | none |

pub mod error;
pub mod handlers;

use crate::access::{create_gate, AccessGate};
use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::scope::ScopeRegistry;
use crate::store::ObjectStore;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub scopes: Arc<ScopeRegistry>,
    pub store: Arc<ObjectStore>,
    pub gate: Arc<dyn AccessGate>,
    pub audit: Arc<AuditLog>,
    /// Base URL for browse links, without a trailing slash
    pub public_url: Arc<str>,
    pub max_artifact_bytes: Option<u64>,
}

impl AppState {
    /// Assemble state from configuration
    pub fn from_config(config: &Config) -> CacheResult<Self> {
        let max_artifact_bytes = config.server.max_artifact_bytes();
        Ok(Self {
            scopes: Arc::new(ScopeRegistry::from_config(config)?),
            store: Arc::new(
                ObjectStore::new(config.storage.scratch_dir())
                    .with_max_object_bytes(max_artifact_bytes),
            ),
            gate: Arc::from(create_gate(&config.access)?),
            audit: Arc::new(AuditLog::new(config)),
            public_url: Arc::from(config.server.public_url()),
            max_artifact_bytes,
        })
    }
}

/// Build the router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/{scope}/repository", any(handlers::repository_root))
        .route("/{scope}/repository/", any(handlers::repository_root))
        .route("/{scope}/repository/{*key}", any(handlers::repository))
        .route("/{scope}/browse", get(handlers::browse_root))
        .route("/{scope}/browse/{*path}", get(handlers::browse))
        // Upload size is enforced while streaming, against max_artifact_mb
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `bind` until Ctrl-C or SIGTERM
pub async fn serve(state: AppState, bind: &str) -> CacheResult<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| CacheError::io(format!("binding {}", bind), e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| CacheError::io("reading listener address", e))?;

    info!(
        "Serving {} scope(s) on http://{} ({} gate)",
        state.scopes.len(),
        addr,
        state.gate.gate_name()
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CacheError::io("serving HTTP", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
