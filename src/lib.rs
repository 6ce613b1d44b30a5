//! Grid Cache - an in-process multi-node cache with metrics and TTL expiry
//!
//! Tracks gets, puts, removals, hits, misses and evictions per node, keeps
//! per-entry expiry state consistent through transactions and reclaims
//! expired entries in the background.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use tasks::spawn_sweep_task;
