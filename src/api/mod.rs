//! API Module
//!
//! HTTP handlers and routing for the grid cache admin API.
//!
//! # Endpoints
//! - `PUT /put` - Store a key-value pair, optionally with a TTL
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key from every replica
//! - `POST /evict/:key` - Evict the local copy of a key
//! - `GET /expiry/:key` - Inspect the local TTL and expire time of a key
//! - `GET /metrics` - Local node metrics
//! - `PUT /metrics/enabled` - Toggle statistics collection
//! - `POST /clear` - Clear every node
//! - `POST /sweep` - Run an expiration pass now
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
