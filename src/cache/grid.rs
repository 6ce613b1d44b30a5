//! Grid Module
//!
//! Ties the nodes of one cache together: routes reads by affinity, applies
//! writes to every replica atomically and hands out per-node cache views.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLockWriteGuard;
use tracing::{debug, info};

use crate::cache::affinity::{AffinityOracle, HashAffinity, NodeId};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::entry::EntryProbe;
use crate::cache::expiry::{apply_policy, AccessKind, EntryExpiryState, ExpiryPolicy};
use crate::cache::metrics::CacheMetricsSnapshot;
use crate::cache::node::NodeCache;
use crate::cache::store::{CacheStore, SweepReport};
use crate::cache::tx::{Transaction, TransactionMetrics, TransactionMetricsSnapshot, TxId};
use crate::config::{CacheConfig, Config};
use crate::error::{CacheError, Result};

// == Staged Writes ==
/// How a write decides the entry's new expiry.
#[derive(Clone)]
pub(crate) enum PendingExpiry {
    Unchanged,
    /// Decided under the replica locks, from the primary's current state.
    Policy(Arc<dyn ExpiryPolicy>),
    /// Puts of one key merged in a transaction, replayed in staging order at
    /// commit. `None` marks a plain put. With `fresh` the puts follow a
    /// removal of the key, so they build a new entry.
    Replay {
        policies: Vec<Option<Arc<dyn ExpiryPolicy>>>,
        fresh: bool,
    },
}

impl PendingExpiry {
    /// Expiry to write, given whether the primary holds a live value.
    fn resolve(&self, existed: bool, now: u64) -> Option<EntryExpiryState> {
        match self {
            PendingExpiry::Unchanged => None,
            PendingExpiry::Policy(policy) => {
                let kind = if existed {
                    AccessKind::Updated
                } else {
                    AccessKind::Created
                };
                apply_policy(kind, policy.as_ref(), now)
            }
            PendingExpiry::Replay { policies, fresh } => {
                let created = *fresh || !existed;
                let start = created.then_some(EntryExpiryState::ETERNAL);
                policies
                    .iter()
                    .enumerate()
                    .fold(start, |state, (index, policy)| match policy {
                        Some(policy) => {
                            let kind = if index == 0 && created {
                                AccessKind::Created
                            } else {
                                AccessKind::Updated
                            };
                            apply_policy(kind, policy.as_ref(), now).or(state)
                        }
                        None => state,
                    })
            }
        }
    }
}

pub(crate) enum WriteOp {
    Put { value: String, only_if_absent: bool },
    Remove,
}

pub(crate) struct StagedWrite {
    pub(crate) key: String,
    pub(crate) op: WriteOp,
    pub(crate) expiry: PendingExpiry,
}

/// Result of one applied write, as seen by the key's primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteOutcome {
    pub(crate) previous: Option<String>,
    pub(crate) applied: bool,
}

/// Write guards over a set of node stores, taken in ascending node order.
struct StoreGuards<'a> {
    ids: Vec<NodeId>,
    guards: Vec<RwLockWriteGuard<'a, CacheStore>>,
}

impl StoreGuards<'_> {
    fn get(&mut self, node: NodeId) -> &mut CacheStore {
        let index = self
            .ids
            .binary_search(&node)
            .unwrap_or_else(|_| unreachable!("{node} was not locked"));
        &mut self.guards[index]
    }
}

// == Grid ==
pub struct Grid {
    nodes: Vec<Arc<NodeCache>>,
    affinity: Arc<dyn AffinityOracle>,
    clock: Arc<dyn Clock>,
    next_tx: AtomicU64,
    tx_metrics: TransactionMetrics,
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("nodes", &self.nodes.len())
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

impl Grid {
    // == Constructors ==
    /// One node per node id the affinity knows about.
    pub fn new(
        affinity: Arc<dyn AffinityOracle>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let nodes = (0..affinity.node_count())
            .map(|id| Arc::new(NodeCache::new(NodeId(id), &config)))
            .collect();
        Self {
            nodes,
            affinity,
            clock,
            next_tx: AtomicU64::new(1),
            tx_metrics: TransactionMetrics::default(),
        }
    }

    pub fn single_node(config: CacheConfig) -> Self {
        Self::new(Arc::new(HashAffinity::single_node()), Arc::new(SystemClock), config)
    }

    pub fn from_config(config: &Config) -> Self {
        let cache = config.cache_config();
        let affinity = HashAffinity::new(config.node_count, cache.backups, cache.mode);
        Self::new(Arc::new(affinity), Arc::new(SystemClock), cache)
    }

    // == Accessors ==
    pub fn node(&self, id: NodeId) -> Result<&Arc<NodeCache>> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(CacheError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Arc<NodeCache>] {
        &self.nodes
    }

    pub fn affinity(&self) -> &dyn AffinityOracle {
        self.affinity.as_ref()
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// A view of the cache as seen from `node`, without an expiry policy.
    pub fn cache(&self, node: NodeId) -> Result<CacheView<'_>> {
        self.node(node)?;
        Ok(CacheView {
            grid: self,
            node,
            policy: None,
        })
    }

    pub fn tx_start(&self, node: NodeId) -> Result<Transaction<'_>> {
        self.node(node)?;
        let id = TxId(self.next_tx.fetch_add(1, Ordering::Relaxed));
        debug!(tx = %id, %node, "transaction started");
        Ok(Transaction::new(self, id, node))
    }

    // == Metrics ==
    pub fn metrics(&self, node: NodeId) -> Result<CacheMetricsSnapshot> {
        Ok(self.node(node)?.snapshot())
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        for node in &self.nodes {
            node.set_statistics_enabled(enabled);
        }
    }

    pub fn reset_metrics(&self) {
        for node in &self.nodes {
            node.metrics().reset();
        }
    }

    pub(crate) fn tx_metrics(&self) -> &TransactionMetrics {
        &self.tx_metrics
    }

    pub fn transaction_metrics(&self) -> TransactionMetricsSnapshot {
        self.tx_metrics.snapshot()
    }

    pub fn reset_transaction_metrics(&self) {
        self.tx_metrics.reset();
    }

    // == Clear ==
    /// Empties every node and zeroes its metrics. Locks held by active
    /// transactions are dropped too, so their commits abort.
    pub fn clear(&self) -> usize {
        let dropped = self.nodes.iter().map(|node| node.clear()).sum();
        info!(dropped, "grid cleared");
        dropped
    }

    // == Expiration ==
    /// Runs one expiration pass on every node that is not paused.
    pub fn sweep_expired(&self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::default();
        for node in self.nodes.iter().filter(|node| !node.is_sweep_paused()) {
            report.absorb(node.sweep_expired(now));
        }
        if report.expired > 0 || report.reclaimed > 0 {
            debug!(?report, "expiration pass finished");
        }
        report
    }

    /// Waits until `key` is absent on `node`, re-checking after every sweep
    /// pass on that node. Returns false if `timeout` elapses first.
    pub async fn wait_until_absent(&self, node: NodeId, key: &str, timeout: Duration) -> Result<bool> {
        let node = self.node(node)?;
        let mut passes = node.subscribe_sweeps();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                if node.is_fully_absent(key, self.now()) {
                    return true;
                }
                if passes.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        Ok(waited.unwrap_or(false))
    }

    // == Internal: Reads ==
    /// Node whose store serves reads of `key` issued on `node`.
    fn read_source(&self, node: NodeId, key: &str) -> NodeId {
        if self.affinity.is_primary_or_backup(node, key) {
            node
        } else {
            self.affinity.primary(key)
        }
    }

    fn read_value(&self, node: NodeId, key: &str, now: u64) -> Option<String> {
        let source = self.read_source(node, key);
        self.nodes[source.0 as usize].write_store().read(key, now)
    }

    // == Internal: Locks ==
    fn lock_stores(&self, mut ids: Vec<NodeId>) -> StoreGuards<'_> {
        ids.sort_unstable();
        ids.dedup();
        let guards = ids
            .iter()
            .map(|id| self.nodes[id.0 as usize].write_store())
            .collect();
        StoreGuards { ids, guards }
    }

    /// Locks `key` for `tx` on every replica, one node at a time.
    pub(crate) fn lock_key(&self, key: &str, tx: TxId) -> Result<()> {
        for owner in self.affinity.owners(key) {
            self.nodes[owner.0 as usize].write_store().lock(key, tx)?;
        }
        Ok(())
    }

    pub(crate) fn release_locks(&self, tx: TxId) {
        for node in &self.nodes {
            node.write_store().release_locks(tx);
        }
    }

    // == Internal: Writes ==
    /// Applies `writes` to every replica of every key while holding all the
    /// involved stores, so no reader sees a replica half-updated.
    ///
    /// Validation runs before anything is applied: a transactional batch must
    /// still own the lock of every key on every replica, a plain batch must not
    /// touch keys locked by a transaction. On failure nothing changes.
    pub(crate) fn write_batch(
        &self,
        tx: Option<TxId>,
        writes: Vec<StagedWrite>,
    ) -> Result<Vec<WriteOutcome>> {
        let plan: Vec<Vec<NodeId>> = writes
            .iter()
            .map(|write| self.affinity.owners(&write.key))
            .collect();
        let mut guards = self.lock_stores(plan.iter().flatten().copied().collect());
        let now = self.now();

        for (write, owners) in writes.iter().zip(&plan) {
            for &owner in owners {
                let store = guards.get(owner);
                match tx {
                    Some(id) if store.lock_holder(&write.key) != Some(id) => {
                        return Err(CacheError::LockLost {
                            key: write.key.clone(),
                            tx: id,
                        });
                    }
                    Some(_) => {}
                    None => store.check_lock(&write.key, None)?,
                }
            }
        }

        let mut outcomes = Vec::with_capacity(writes.len());
        for (write, owners) in writes.into_iter().zip(plan) {
            let primary = owners[0];
            let previous = guards
                .get(primary)
                .peek(&write.key, now)
                .map(str::to_string);

            let applied = match write.op {
                WriteOp::Put {
                    value,
                    only_if_absent,
                } => {
                    if only_if_absent && previous.is_some() {
                        outcomes.push(WriteOutcome {
                            previous,
                            applied: false,
                        });
                        continue;
                    }
                    let expiry = write.expiry.resolve(previous.is_some(), now);
                    for owner in owners {
                        let started = Instant::now();
                        guards.get(owner).put(&write.key, value.clone(), expiry, now);
                        self.nodes[owner.0 as usize]
                            .metrics()
                            .record_put(started.elapsed());
                    }
                    true
                }
                WriteOp::Remove => {
                    for owner in owners {
                        let started = Instant::now();
                        let removed = guards.get(owner).remove(&write.key, now).is_some();
                        self.nodes[owner.0 as usize]
                            .metrics()
                            .record_remove(started.elapsed(), removed);
                    }
                    previous.is_some()
                }
            };
            outcomes.push(WriteOutcome { previous, applied });
        }

        Ok(outcomes)
    }

    /// Restarts the TTL of a live `key` on every replica. Keys held by a
    /// transaction are left alone.
    fn refresh_on_access(&self, key: &str, expiry: EntryExpiryState) {
        let owners = self.affinity.owners(key);
        let mut guards = self.lock_stores(owners.clone());
        let now = self.now();
        if owners
            .iter()
            .any(|&owner| guards.get(owner).check_lock(key, None).is_err())
        {
            debug!(key, "skipping access refresh of a locked key");
            return;
        }
        for owner in owners {
            guards.get(owner).refresh_expiry(key, expiry, now);
        }
    }
}

// == Cache View ==
/// The cache as seen from one node, optionally with an expiry policy attached.
#[derive(Clone)]
pub struct CacheView<'g> {
    grid: &'g Grid,
    node: NodeId,
    policy: Option<Arc<dyn ExpiryPolicy>>,
}

impl fmt::Debug for CacheView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheView")
            .field("node", &self.node)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<'g> CacheView<'g> {
    /// Same view, with writes and reads governed by `policy`.
    pub fn with_expiry_policy(&self, policy: impl ExpiryPolicy + 'static) -> CacheView<'g> {
        CacheView {
            grid: self.grid,
            node: self.node,
            policy: Some(Arc::new(policy)),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn local(&self) -> &'g NodeCache {
        &self.grid.nodes[self.node.0 as usize]
    }

    fn pending_expiry(&self) -> PendingExpiry {
        match &self.policy {
            Some(policy) => PendingExpiry::Policy(policy.clone()),
            None => PendingExpiry::Unchanged,
        }
    }

    fn single(&self, key: &str, op: WriteOp) -> Result<WriteOutcome> {
        let write = StagedWrite {
            key: key.to_string(),
            op,
            expiry: self.pending_expiry(),
        };
        let mut outcomes = self.grid.write_batch(None, vec![write])?;
        Ok(outcomes.remove(0))
    }

    fn record_read(&self, key: &str, hit: bool, started: Instant) {
        let cost = self.grid.affinity.read_cost(self.node, key);
        self.local().metrics().record_get(hit, cost, started.elapsed());
    }

    // == Reads ==
    /// Reads `key`. An expired entry reads as absent even before any sweep.
    pub fn get(&self, key: &str) -> Option<String> {
        let started = Instant::now();
        let now = self.grid.now();
        let value = self.grid.read_value(self.node, key, now);

        if value.is_some() {
            if let Some(policy) = &self.policy {
                if let Some(expiry) = apply_policy(AccessKind::Accessed, policy.as_ref(), now) {
                    self.grid.refresh_on_access(key, expiry);
                }
            }
        }

        self.record_read(key, value.is_some(), started);
        value
    }

    /// Reads every key, returning the ones that have a value.
    pub fn get_all<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> HashMap<String, String> {
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Whether `key` has a visible value. Not counted as a read.
    pub fn contains_key(&self, key: &str) -> bool {
        !self.is_logically_absent(key)
    }

    /// True when readers on this node would see no value for `key`, whether
    /// or not its storage has been reclaimed yet.
    pub fn is_logically_absent(&self, key: &str) -> bool {
        let source = self.grid.read_source(self.node, key);
        self.grid.nodes[source.0 as usize].is_logically_absent(key, self.grid.now())
    }

    // == Writes ==
    pub fn put(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.single(
            key,
            WriteOp::Put {
                value: value.into(),
                only_if_absent: false,
            },
        )?;
        Ok(())
    }

    /// Writes every pair in one batch; each key counts as one put per replica.
    pub fn put_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let writes = entries
            .into_iter()
            .map(|(key, value)| StagedWrite {
                key: key.into(),
                op: WriteOp::Put {
                    value: value.into(),
                    only_if_absent: false,
                },
                expiry: self.pending_expiry(),
            })
            .collect();
        self.grid.write_batch(None, writes)?;
        Ok(())
    }

    /// Writes only if `key` has no value. Returns whether it wrote.
    pub fn put_if_absent(&self, key: &str, value: impl Into<String>) -> Result<bool> {
        let outcome = self.single(
            key,
            WriteOp::Put {
                value: value.into(),
                only_if_absent: true,
            },
        )?;
        Ok(outcome.applied)
    }

    /// Writes `value` and returns the previous one. The lookup of the previous
    /// value is counted as a read.
    pub fn get_and_put(&self, key: &str, value: impl Into<String>) -> Result<Option<String>> {
        let started = Instant::now();
        let outcome = self.single(
            key,
            WriteOp::Put {
                value: value.into(),
                only_if_absent: false,
            },
        )?;
        self.record_read(key, outcome.previous.is_some(), started);
        Ok(outcome.previous)
    }

    // == Removes ==
    /// Removes `key` from every replica. Returns whether a value was deleted.
    pub fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.single(key, WriteOp::Remove)?.applied)
    }

    /// Removes `key` and returns its value, counting the lookup as a read.
    pub fn get_and_remove(&self, key: &str) -> Result<Option<String>> {
        let started = Instant::now();
        let outcome = self.single(key, WriteOp::Remove)?;
        self.record_read(key, outcome.previous.is_some(), started);
        Ok(outcome.previous)
    }

    /// Removes every key in one batch. Returns the number of values deleted.
    pub fn remove_all<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> Result<usize> {
        let writes = keys
            .into_iter()
            .map(|key| StagedWrite {
                key: key.to_string(),
                op: WriteOp::Remove,
                expiry: PendingExpiry::Unchanged,
            })
            .collect();
        let outcomes = self.grid.write_batch(None, writes)?;
        Ok(outcomes.iter().filter(|outcome| outcome.applied).count())
    }

    // == Evict ==
    /// Drops this node's copy of `key`. Counts as an eviction, never a removal.
    pub fn evict(&self, key: &str) -> bool {
        let now = self.grid.now();
        let evicted = self.local().write_store().evict(key, now);
        if evicted {
            self.local().metrics().record_eviction();
        }
        evicted
    }

    // == Local Inspection ==
    /// Expiry of this node's copy of `key`. `None` when the node holds no slot.
    pub fn expiry(&self, key: &str) -> Result<Option<EntryExpiryState>> {
        self.local().expiry_state(key, self.grid.now())
    }

    /// Diagnostic view of this node's slot for `key`.
    pub fn probe(&self, key: &str) -> Option<EntryProbe> {
        self.local().probe(key, self.grid.now())
    }

    /// Live entries held by this node.
    pub fn len(&self) -> usize {
        self.local().len(self.grid.now())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.local().snapshot()
    }
}
