//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheMetricsSnapshot, EntryExpiryState, NodeId, TransactionMetricsSnapshot};

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for PUT /put
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    /// Success message
    pub message: String,
    /// The key that was written
    pub key: String,
}

impl PutResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /del/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for POST /evict/:key
#[derive(Debug, Clone, Serialize)]
pub struct EvictResponse {
    pub key: String,
    pub node: NodeId,
}

/// Response body for GET /expiry/:key
///
/// `ttl` and `expire_time` are in milliseconds; both are 0 for an entry
/// that never expires.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryResponse {
    pub key: String,
    pub ttl: u64,
    pub expire_time: u64,
}

impl ExpiryResponse {
    pub fn new(key: impl Into<String>, state: EntryExpiryState) -> Self {
        Self {
            key: key.into(),
            ttl: state.ttl(),
            expire_time: state.expire_time(),
        }
    }
}

/// Response body for GET /metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub node: NodeId,
    pub statistics_enabled: bool,
    /// Live entries held by the node
    pub entries: usize,
    #[serde(flatten)]
    pub metrics: CacheMetricsSnapshot,
    pub hit_percentage: f64,
    pub miss_percentage: f64,
    pub transactions: TransactionMetricsSnapshot,
}

impl MetricsResponse {
    pub fn new(
        node: NodeId,
        statistics_enabled: bool,
        entries: usize,
        metrics: CacheMetricsSnapshot,
        transactions: TransactionMetricsSnapshot,
    ) -> Self {
        Self {
            node,
            statistics_enabled,
            entries,
            hit_percentage: metrics.hit_percentage(),
            miss_percentage: metrics.miss_percentage(),
            metrics,
            transactions,
        }
    }
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Slots dropped across all nodes
    pub dropped: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
