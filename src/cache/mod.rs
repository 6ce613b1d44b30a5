//! Cache Module
//!
//! A multi-node in-process cache with per-node metrics, per-entry TTL
//! expiration and pessimistic transactions.

mod affinity;
mod clock;
mod entry;
mod expiry;
mod grid;
mod metrics;
mod node;
mod store;
mod tx;


// Re-export public types
pub use affinity::{AffinityOracle, CacheMode, HashAffinity, NodeId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::EntryProbe;
pub use expiry::{
    apply_policy, AccessKind, AccessedExpiryPolicy, CreatedExpiryPolicy, EntryExpiryState,
    EternalExpiryPolicy, ExpiryDuration, ExpiryPolicy, ModifiedExpiryPolicy, TouchedExpiryPolicy,
};
pub use grid::{CacheView, Grid};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, ReadCost};
pub use node::NodeCache;
pub use store::SweepReport;
pub use tx::{
    PendingWrite, Transaction, TransactionExpiryBuffer, TransactionMetricsSnapshot, TxId, TxState,
};
