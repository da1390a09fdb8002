//! Request handlers

use super::AppState;
use crate::access::{Permission, Principal};
use crate::error::{CacheError, CacheResult};
use crate::scope::Scope;
use crate::store::{ByteStream, Listing};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// `GET|PUT /{scope}/repository/{*key}`; every other verb is not implemented
pub async fn repository(
    State(state): State<AppState>,
    method: Method,
    Path((scope, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> CacheResult<Response> {
    dispatch(&state, method, &scope, &key, &headers, body).await
}

/// `/{scope}/repository[/]` with no key
pub async fn repository_root(
    State(state): State<AppState>,
    method: Method,
    Path(scope): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> CacheResult<Response> {
    dispatch(&state, method, &scope, "", &headers, body).await
}

async fn dispatch(
    state: &AppState,
    method: Method,
    scope: &str,
    key: &str,
    headers: &HeaderMap,
    body: Body,
) -> CacheResult<Response> {
    match method {
        Method::GET => get_artifact(state, scope, key, headers).await,
        Method::PUT => put_artifact(state, scope, key, headers, body).await,
        other => Err(CacheError::UnsupportedMethod(other.to_string())),
    }
}

async fn get_artifact(
    state: &AppState,
    scope_name: &str,
    key: &str,
    headers: &HeaderMap,
) -> CacheResult<Response> {
    let scope = authorize(state, scope_name, headers, Permission::Read).await?;

    let object = state
        .store
        .get(scope.root(), key)
        .await?
        .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

    let last_modified = object
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, object.size)
        .header(header::LAST_MODIFIED, last_modified)
        .body(Body::from_stream(object.stream))
        .map_err(|e| CacheError::Internal(format!("building response: {}", e)))
}

async fn put_artifact(
    state: &AppState,
    scope_name: &str,
    key: &str,
    headers: &HeaderMap,
    body: Body,
) -> CacheResult<Response> {
    let scope = authorize(state, scope_name, headers, Permission::Write).await?;

    if let (Some(limit), Some(declared)) = (state.max_artifact_bytes, content_length(headers)) {
        if declared > limit {
            return Err(CacheError::PayloadTooLarge { limit });
        }
    }

    let stream: ByteStream = Box::pin(body.into_data_stream().map_err(io::Error::other));
    let receipt = state.store.put(scope.root(), key, stream).await?;

    state
        .audit
        .log(
            "artifact.stored",
            &serde_json::json!({
                "scope": scope.name(),
                "key": receipt.key,
                "size": receipt.size,
                "sha256": receipt.sha256,
            }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}

/// `GET /{scope}/browse`
pub async fn browse_root(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    headers: HeaderMap,
) -> CacheResult<Json<Listing>> {
    browse_path(&state, &scope, "", &headers).await
}

/// `GET /{scope}/browse/{*path}`
pub async fn browse(
    State(state): State<AppState>,
    Path((scope, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> CacheResult<Json<Listing>> {
    browse_path(&state, &scope, &path, &headers).await
}

async fn browse_path(
    state: &AppState,
    scope_name: &str,
    path: &str,
    headers: &HeaderMap,
) -> CacheResult<Json<Listing>> {
    let scope = authorize(state, scope_name, headers, Permission::Read).await?;
    let base_url = format!("{}/{}/browse", state.public_url, scope.name());
    let listing = crate::store::list(scope.root(), path, &base_url).await?;
    Ok(Json(listing))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// Resolve the scope and check the caller's permission on it
///
/// Runs before any filesystem access for the request.
async fn authorize(
    state: &AppState,
    scope_name: &str,
    headers: &HeaderMap,
    required: Permission,
) -> CacheResult<Arc<Scope>> {
    let scope = state.scopes.get(scope_name)?;
    let principal = Principal::from_authorization(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    );

    if let Err(err) = state.gate.check_permission(&principal, &scope, required).await {
        debug!(
            "{} gate denied {} on {}: {}",
            state.gate.gate_name(),
            required,
            scope.name(),
            err
        );
        state
            .audit
            .log(
                "access.denied",
                &serde_json::json!({
                    "scope": scope.name(),
                    "required": required,
                    "gate": state.gate.gate_name(),
                    "authenticated": principal != Principal::Anonymous,
                    "reason": err.to_string(),
                }),
            )
            .await;
        return Err(err);
    }
    Ok(scope)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
