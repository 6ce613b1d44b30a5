//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiration sweep: expires and reclaims entries on every grid node

mod sweep;

pub use sweep::spawn_sweep_task;
