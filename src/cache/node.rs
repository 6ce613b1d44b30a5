//! Node Cache Module
//!
//! One node's share of the cache: its store, its metrics accumulator and
//! the completion signal of its expiration sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::affinity::NodeId;
use crate::cache::entry::EntryProbe;
use crate::cache::expiry::EntryExpiryState;
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::cache::store::{CacheStore, SweepReport};
use crate::config::CacheConfig;
use crate::error::Result;

// == Node Cache ==
#[derive(Debug)]
pub struct NodeCache {
    id: NodeId,
    store: RwLock<CacheStore>,
    metrics: Arc<CacheMetrics>,
    sweep_paused: AtomicBool,
    /// Number of completed sweep passes.
    sweep_passes: watch::Sender<u64>,
}

impl NodeCache {
    pub fn new(id: NodeId, config: &CacheConfig) -> Self {
        let (sweep_passes, _) = watch::channel(0);
        Self {
            id,
            store: RwLock::new(CacheStore::new(config.deferred_delete)),
            metrics: Arc::new(CacheMetrics::new(config.statistics_enabled)),
            sweep_paused: AtomicBool::new(false),
            sweep_passes,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.metrics.set_enabled(enabled);
    }

    pub(crate) fn write_store(&self) -> RwLockWriteGuard<'_, CacheStore> {
        self.store.write()
    }

    // == Inspection ==
    pub fn is_logically_absent(&self, key: &str, now: u64) -> bool {
        self.store.read().is_logically_absent(key, now)
    }

    /// Whether the local slot for `key` is gone or holds no value anyone can see.
    /// Outside deferred-delete mode this also requires the slot itself to be gone.
    pub fn is_fully_absent(&self, key: &str, now: u64) -> bool {
        let store = self.store.read();
        store.is_logically_absent(key, now) && (store.deferred_delete() || !store.has_slot(key))
    }

    pub fn expiry_state(&self, key: &str, now: u64) -> Result<Option<EntryExpiryState>> {
        self.store.read().expiry_state(key, now)
    }

    pub fn probe(&self, key: &str, now: u64) -> Option<EntryProbe> {
        self.store.read().probe(key, now)
    }

    pub fn len(&self, now: u64) -> usize {
        self.store.read().len(now)
    }

    pub fn is_empty(&self, now: u64) -> bool {
        self.len(now) == 0
    }

    // == Sweep ==
    /// Runs one expiration pass over this node and signals its completion.
    pub fn sweep_expired(&self, now: u64) -> SweepReport {
        let report = self.store.write().sweep_expired(now);
        self.sweep_passes.send_modify(|passes| *passes += 1);
        if report.deferred > 0 {
            debug!(node = %self.id, deferred = report.deferred, "expired keys locked by transactions");
        }
        report
    }

    pub fn pause_sweep(&self) -> bool {
        self.sweep_paused.swap(true, Ordering::SeqCst)
    }

    pub fn resume_sweep(&self) {
        self.sweep_paused.store(false, Ordering::SeqCst);
    }

    pub fn is_sweep_paused(&self) -> bool {
        self.sweep_paused.load(Ordering::SeqCst)
    }

    pub fn subscribe_sweeps(&self) -> watch::Receiver<u64> {
        self.sweep_passes.subscribe()
    }

    // == Clear ==
    /// Drops every entry and lock on this node and zeroes its metrics.
    /// Background sweeps are held off while the clear runs.
    pub fn clear(&self) -> usize {
        let was_paused = self.pause_sweep();
        let dropped = self.store.write().clear();
        self.metrics.reset();
        if !was_paused {
            self.resume_sweep();
        }
        info!(node = %self.id, dropped, "node cache cleared");
        dropped
    }
}
