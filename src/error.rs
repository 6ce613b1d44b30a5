//! Error types for the grid cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::{NodeId, TxId, TxState};

// == Cache Error Enum ==
/// Unified error type for the grid cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The entry was logically removed while its slot is still being reclaimed.
    /// The caller should retry the read.
    #[error("Entry removed concurrently: {0}")]
    EntryRemovedConcurrently(String),

    /// An expiry policy failed to produce a duration
    #[error("Expiry policy evaluation failed: {0}")]
    PolicyEvaluation(String),

    /// A transaction lifecycle call arrived in the wrong state
    #[error("Invalid transaction state: cannot {action} transaction {tx} in state {state:?}")]
    InvalidTransactionState {
        tx: TxId,
        state: TxState,
        action: &'static str,
    },

    /// The key is locked by another active transaction
    #[error("Key '{key}' is locked by transaction {holder}")]
    LockConflict { key: String, holder: TxId },

    /// A transaction's key lock was dropped before it could commit
    #[error("Transaction {tx} no longer holds the lock on '{key}'")]
    LockLost { key: String, tx: TxId },

    /// Commit validation failed and the transaction was rolled back
    #[error("Transaction {tx} aborted: {reason}")]
    TransactionAborted { tx: TxId, reason: String },

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Node id outside the grid topology
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::UnknownNode(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::LockConflict { .. }
            | CacheError::LockLost { .. }
            | CacheError::TransactionAborted { .. }
            | CacheError::EntryRemovedConcurrently(_) => StatusCode::CONFLICT,
            CacheError::PolicyEvaluation(_) | CacheError::InvalidTransactionState { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the grid cache.
pub type Result<T> = std::result::Result<T, CacheError>;
