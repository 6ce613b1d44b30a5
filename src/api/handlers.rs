//! API Handlers
//!
//! HTTP request handlers for each admin endpoint. Every handler operates on
//! the grid as seen from the server's local node.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::cache::{Grid, NodeId, SweepReport, TouchedExpiryPolicy};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, EvictResponse, ExpiryResponse, GetResponse, HealthResponse,
    MetricsEnabledRequest, MetricsResponse, PutRequest, PutResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub grid: Arc<Grid>,
    /// Node the HTTP surface reads and writes through
    pub local: NodeId,
}

impl AppState {
    pub fn new(grid: Arc<Grid>, local: NodeId) -> Self {
        Self { grid, local }
    }

    /// Builds the grid described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(Grid::from_config(config)), config.local_node)
    }
}

/// Handler for PUT /put
///
/// Stores a key-value pair. A `ttl_ms` applies a touched expiry policy.
pub async fn put_handler(
    State(state): State<AppState>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let cache = state.grid.cache(state.local)?;
    let ttl = req.ttl();
    match ttl {
        Some(ttl) => cache
            .with_expiry_policy(TouchedExpiryPolicy(ttl))
            .put(&req.key, req.value)?,
        None => cache.put(&req.key, req.value)?,
    }

    Ok(Json(PutResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state.grid.cache(state.local)?.get(&key);
    match value {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.grid.cache(state.local)?.remove(&key)? {
        return Err(CacheError::NotFound(key));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /evict/:key
///
/// Drops the local node's copy only.
pub async fn evict_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EvictResponse>> {
    if !state.grid.cache(state.local)?.evict(&key) {
        return Err(CacheError::NotFound(key));
    }
    Ok(Json(EvictResponse {
        key,
        node: state.local,
    }))
}

/// Handler for GET /expiry/:key
///
/// Responds 409 while the entry is logically removed but not yet reclaimed.
pub async fn expiry_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ExpiryResponse>> {
    match state.grid.cache(state.local)?.expiry(&key)? {
        Some(expiry) => Ok(Json(ExpiryResponse::new(key, expiry))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<Json<MetricsResponse>> {
    let grid = &state.grid;
    let node = grid.node(state.local)?;

    Ok(Json(MetricsResponse::new(
        state.local,
        node.metrics().is_enabled(),
        node.len(grid.now()),
        node.snapshot(),
        grid.transaction_metrics(),
    )))
}

/// Handler for PUT /metrics/enabled
///
/// Toggles statistics on every node. Any change resets the accumulators.
pub async fn metrics_enabled_handler(
    State(state): State<AppState>,
    Json(req): Json<MetricsEnabledRequest>,
) -> Result<Json<MetricsResponse>> {
    state.grid.set_statistics_enabled(req.enabled);
    metrics_handler(State(state)).await
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let dropped = state.grid.clear();
    Json(ClearResponse { dropped })
}

/// Handler for POST /sweep
///
/// Runs one expiration pass immediately.
pub async fn sweep_handler(State(state): State<AppState>) -> Json<SweepReport> {
    let report = state.grid.sweep_expired();
    info!(?report, "manual expiration sweep");
    Json(report)
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn test_state() -> AppState {
        AppState::new(Arc::new(Grid::single_node(CacheConfig::default())), NodeId(0))
    }

    fn put_request(key: &str, value: &str, ttl_ms: Option<u64>) -> PutRequest {
        PutRequest {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms,
        }
    }

    #[tokio::test]
    async fn test_put_and_get_handler() {
        let state = test_state();

        let result = put_handler(State(state.clone()), Json(put_request("k", "v", None))).await;
        assert!(result.is_ok());

        let response = get_handler(State(state.clone()), Path("k".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value, "v");
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state();

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert_eq!(
            result.unwrap_err(),
            CacheError::NotFound("nonexistent".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_with_ttl_sets_expiry() {
        let state = test_state();
        put_handler(State(state.clone()), Json(put_request("k", "v", Some(60_000))))
            .await
            .unwrap();

        let response = expiry_handler(State(state.clone()), Path("k".to_string()))
            .await
            .unwrap();
        assert_eq!(response.ttl, 60_000);
        assert!(response.expire_time > 0);
    }

    #[tokio::test]
    async fn test_delete_and_evict_handlers() {
        let state = test_state();
        put_handler(State(state.clone()), Json(put_request("a", "1", None)))
            .await
            .unwrap();
        put_handler(State(state.clone()), Json(put_request("b", "2", None)))
            .await
            .unwrap();

        assert!(delete_handler(State(state.clone()), Path("a".to_string()))
            .await
            .is_ok());
        assert!(delete_handler(State(state.clone()), Path("a".to_string()))
            .await
            .is_err());
        assert!(evict_handler(State(state.clone()), Path("b".to_string()))
            .await
            .is_ok());

        let metrics = metrics_handler(State(state)).await.unwrap();
        assert_eq!(metrics.metrics.removals, 1);
        assert_eq!(metrics.metrics.evictions, 1);
        assert_eq!(metrics.entries, 0);
    }

    #[tokio::test]
    async fn test_metrics_toggle_resets() {
        let state = test_state();
        put_handler(State(state.clone()), Json(put_request("k", "v", None)))
            .await
            .unwrap();

        let response = metrics_enabled_handler(
            State(state.clone()),
            Json(MetricsEnabledRequest { enabled: false }),
        )
        .await
        .unwrap();
        assert!(!response.statistics_enabled);
        assert_eq!(response.metrics.puts, 0);

        put_handler(State(state.clone()), Json(put_request("k", "v2", None)))
            .await
            .unwrap();
        let response = metrics_handler(State(state)).await.unwrap();
        assert_eq!(response.metrics.puts, 0);
        assert_eq!(response.entries, 1);
    }

    #[tokio::test]
    async fn test_clear_and_sweep_handlers() {
        let state = test_state();
        put_handler(State(state.clone()), Json(put_request("k", "v", None)))
            .await
            .unwrap();

        let report = sweep_handler(State(state.clone())).await;
        assert_eq!(report.expired, 0);

        let response = clear_handler(State(state.clone())).await;
        assert_eq!(response.dropped, 1);
        assert!(get_handler(State(state), Path("k".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn test_put_invalid_request() {
        let state = test_state();

        let result = put_handler(State(state), Json(put_request("", "value", None))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
