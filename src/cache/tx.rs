//! Transaction Module
//!
//! Buffers writes made inside a transaction and applies them to every
//! replica at commit, or discards them at rollback.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::cache::affinity::NodeId;
use crate::cache::expiry::ExpiryPolicy;
use crate::cache::grid::{Grid, PendingExpiry, StagedWrite, WriteOp};
use crate::error::{CacheError, Result};

/// Identity of a transaction within a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// `Active -> Committing -> Committed` or `Active -> RollingBack -> RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxState {
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

// == Pending Write ==
/// A buffered write. `value` of `None` is a removal.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub value: Option<String>,
    /// Expiry policies of the puts staged since the last removal, oldest
    /// first. `None` marks a plain put, which leaves the expiry alone.
    pub policies: Vec<Option<Arc<dyn ExpiryPolicy>>>,
    /// The puts follow a removal staged in the same transaction.
    pub replaces_removal: bool,
}

impl PendingWrite {
    pub fn put(value: String, policy: Option<Arc<dyn ExpiryPolicy>>) -> Self {
        Self {
            value: Some(value),
            policies: vec![policy],
            replaces_removal: false,
        }
    }

    pub fn remove() -> Self {
        Self {
            value: None,
            policies: Vec::new(),
            replaces_removal: false,
        }
    }
}

// == Transaction Expiry Buffer ==
/// Private per-transaction staging area. Nothing in it is visible outside
/// the transaction until commit.
#[derive(Debug, Default)]
pub struct TransactionExpiryBuffer {
    pending: HashMap<String, PendingWrite>,
    /// Keys in first-write order, so commit applies writes deterministically.
    order: Vec<String>,
}

impl TransactionExpiryBuffer {
    /// Stages a write, merging it with earlier writes of the same key.
    pub fn stage(&mut self, key: &str, write: PendingWrite) {
        let existing = match self.pending.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                self.order.push(key.to_string());
                slot.insert(write);
                return;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if write.value.is_none() {
            *existing = write;
        } else if existing.value.is_none() {
            *existing = PendingWrite {
                replaces_removal: true,
                ..write
            };
        } else {
            existing.value = write.value;
            existing.policies.extend(write.policies);
        }
    }

    pub fn get(&self, key: &str) -> Option<&PendingWrite> {
        self.pending.get(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Empties the buffer into writes ready to be applied, in staging order.
    pub fn take(&mut self) -> Vec<(String, PendingWrite)> {
        let mut pending = std::mem::take(&mut self.pending);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| pending.remove(&key).map(|write| (key, write)))
            .collect()
    }

    pub fn discard(&mut self) {
        self.pending.clear();
        self.order.clear();
    }
}

// == Transaction Metrics ==
#[derive(Debug, Default)]
pub struct TransactionMetrics {
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionMetricsSnapshot {
    pub commits: u64,
    pub rollbacks: u64,
}

impl TransactionMetrics {
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransactionMetricsSnapshot {
        TransactionMetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.commits.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
    }
}

// == Transaction ==
/// A pessimistic transaction started on one node.
///
/// Every written key is locked on all of its replicas until the transaction
/// finishes. A transaction dropped while active is rolled back.
pub struct Transaction<'g> {
    grid: &'g Grid,
    id: TxId,
    node: NodeId,
    state: TxState,
    buffer: TransactionExpiryBuffer,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("state", &self.state)
            .field("pending", &self.buffer.len())
            .finish()
    }
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(grid: &'g Grid, id: TxId, node: NodeId) -> Self {
        Self {
            grid,
            id,
            node,
            state: TxState::Active,
            buffer: TransactionExpiryBuffer::default(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Staged writes, for inspection.
    pub fn buffer(&self) -> &TransactionExpiryBuffer {
        &self.buffer
    }

    // == Writes ==
    /// Stages a write that leaves the entry's expiry untouched.
    pub fn put(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.stage(key, PendingWrite::put(value.into(), None))
    }

    /// Stages a write whose expiry `policy` decides when the transaction
    /// commits.
    pub fn put_with_expiry(
        &mut self,
        key: &str,
        value: impl Into<String>,
        policy: impl ExpiryPolicy + 'static,
    ) -> Result<()> {
        self.stage(key, PendingWrite::put(value.into(), Some(Arc::new(policy))))
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.stage(key, PendingWrite::remove())
    }

    /// Reads through the buffer first, then the grid.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_state(TxState::Active, "read in")?;
        match self.buffer.get(key) {
            Some(pending) => Ok(pending.value.clone()),
            None => Ok(self.grid.cache(self.node)?.get(key)),
        }
    }

    fn stage(&mut self, key: &str, write: PendingWrite) -> Result<()> {
        self.ensure_state(TxState::Active, "write in")?;

        if let Err(err) = self.grid.lock_key(key, self.id) {
            warn!(tx = %self.id, key, error = %err, "transactional write failed, rolling back");
            self.finish_rollback();
            return Err(err);
        }

        self.buffer.stage(key, write);
        Ok(())
    }

    // == Commit ==
    /// Applies every staged write to all replicas in one step. If validation
    /// fails nothing is applied, the transaction rolls back and
    /// `TransactionAborted` is returned.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_state(TxState::Active, "commit")?;
        self.state = TxState::Committing;

        let writes: Vec<StagedWrite> = self
            .buffer
            .take()
            .into_iter()
            .map(|(key, pending)| StagedWrite {
                key,
                op: match pending.value {
                    Some(value) => WriteOp::Put {
                        value,
                        only_if_absent: false,
                    },
                    None => WriteOp::Remove,
                },
                expiry: PendingExpiry::Replay {
                    policies: pending.policies,
                    fresh: pending.replaces_removal,
                },
            })
            .collect();
        let count = writes.len();

        match self.grid.write_batch(Some(self.id), writes) {
            Ok(_) => {
                self.grid.release_locks(self.id);
                self.state = TxState::Committed;
                self.grid.tx_metrics().record_commit();
                debug!(tx = %self.id, writes = count, "transaction committed");
                Ok(())
            }
            Err(err) => {
                warn!(tx = %self.id, error = %err, "commit validation failed, rolling back");
                self.state = TxState::RollingBack;
                self.finish_rollback();
                Err(CacheError::TransactionAborted {
                    tx: self.id,
                    reason: err.to_string(),
                })
            }
        }
    }

    // == Rollback ==
    /// Discards every staged write. No entry changes.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_state(TxState::Active, "rollback")?;
        self.state = TxState::RollingBack;
        self.finish_rollback();
        debug!(tx = %self.id, "transaction rolled back");
        Ok(())
    }

    fn finish_rollback(&mut self) {
        self.buffer.discard();
        self.grid.release_locks(self.id);
        self.state = TxState::RolledBack;
        self.grid.tx_metrics().record_rollback();
    }

    fn ensure_state(&self, expected: TxState, action: &'static str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        error!(tx = %self.id, state = ?self.state, action, "invalid transaction state");
        Err(CacheError::InvalidTransactionState {
            tx: self.id,
            state: self.state,
            action,
        })
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            debug!(tx = %self.id, "transaction dropped while active, rolling back");
            self.finish_rollback();
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::expiry::TouchedExpiryPolicy;
    use std::time::Duration;

    fn touched() -> Option<Arc<dyn ExpiryPolicy>> {
        Some(Arc::new(TouchedExpiryPolicy(Duration::from_secs(1))))
    }

    #[test]
    fn test_buffer_merges_writes_to_same_key() {
        let mut buffer = TransactionExpiryBuffer::default();
        buffer.stage("k", PendingWrite::put("1".to_string(), touched()));
        buffer.stage("k", PendingWrite::put("2".to_string(), None));

        let pending = buffer.get("k").unwrap();
        assert_eq!(pending.value.as_deref(), Some("2"));
        assert_eq!(pending.policies.len(), 2);
        assert!(pending.policies[0].is_some());
        assert!(!pending.replaces_removal);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_buffer_removal_drops_staged_policies() {
        let mut buffer = TransactionExpiryBuffer::default();
        buffer.stage("k", PendingWrite::put("1".to_string(), touched()));
        buffer.stage("k", PendingWrite::remove());

        let pending = buffer.get("k").unwrap();
        assert_eq!(pending.value, None);
        assert!(pending.policies.is_empty());
    }

    #[test]
    fn test_buffer_put_after_removal_starts_over() {
        let mut buffer = TransactionExpiryBuffer::default();
        buffer.stage("k", PendingWrite::put("1".to_string(), touched()));
        buffer.stage("k", PendingWrite::remove());
        buffer.stage("k", PendingWrite::put("2".to_string(), None));

        let pending = buffer.get("k").unwrap();
        assert_eq!(pending.value.as_deref(), Some("2"));
        assert!(pending.replaces_removal);
        assert_eq!(pending.policies.len(), 1);
        assert!(pending.policies[0].is_none());
    }

    #[test]
    fn test_buffer_take_preserves_order() {
        let mut buffer = TransactionExpiryBuffer::default();
        for key in ["c", "a", "b"] {
            buffer.stage(key, PendingWrite::put(key.to_string(), None));
        }
        let keys: Vec<String> = buffer.take().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_transaction_metrics_reset() {
        let metrics = TransactionMetrics::default();
        metrics.record_commit();
        metrics.record_rollback();
        metrics.record_rollback();
        assert_eq!(
            metrics.snapshot(),
            TransactionMetricsSnapshot {
                commits: 1,
                rollbacks: 2
            }
        );
        metrics.reset();
        assert_eq!(metrics.snapshot(), TransactionMetricsSnapshot::default());
    }
}
