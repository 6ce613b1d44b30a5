//! Operation Metrics Module
//!
//! Lock-free per-cache accumulator for operation counts and timings, plus the
//! immutable snapshot handed out to callers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use serde::Serialize;
use tracing::{info, warn};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

// == Read Cost ==
/// Number of read units one logical read is recorded as.
///
/// A read served by the key's primary in a partitioned cache costs one unit.
/// Any other read (non-primary node, or a replicated cache) is recorded as the
/// local attempt plus the fetch from the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCost {
    PrimaryLocal,
    WithRemoteFetch,
}

impl ReadCost {
    pub fn units(self) -> u64 {
        match self {
            ReadCost::PrimaryLocal => 1,
            ReadCost::WithRemoteFetch => 2,
        }
    }
}

// == Timed Counter ==
#[derive(Debug, Default)]
struct TimedCounter {
    count: CachePadded<AtomicU64>,
    total_nanos: CachePadded<AtomicU64>,
}

impl TimedCounter {
    fn add(&self, count: u64, elapsed: Duration) {
        self.count.fetch_add(count, Ordering::Relaxed);
        let nanos = elapsed_nanos(elapsed);
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .total_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(nanos))
            });
    }

    /// Average in milliseconds, `0.0` when nothing was recorded.
    fn average_millis(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_nanos.load(Ordering::Relaxed);
        total as f64 / count as f64 / NANOS_PER_MILLI
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_nanos.store(0, Ordering::Relaxed);
    }
}

fn elapsed_nanos(elapsed: Duration) -> u64 {
    match u64::try_from(elapsed.as_nanos()) {
        Ok(nanos) => nanos,
        Err(_) => {
            warn!(?elapsed, "operation time does not fit the timer, saturating");
            u64::MAX
        }
    }
}

// == Cache Metrics ==
/// Per-cache operation accumulator shared by every thread on a node.
///
/// All updates are relaxed atomic increments; a snapshot reads each field
/// independently, so fields are individually exact but not mutually atomic.
#[derive(Debug)]
pub struct CacheMetrics {
    enabled: AtomicBool,
    gets: TimedCounter,
    puts: TimedCounter,
    /// Remove attempts, whether or not anything was deleted.
    remove_attempts: TimedCounter,
    removals: CachePadded<AtomicU64>,
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            gets: TimedCounter::default(),
            puts: TimedCounter::default(),
            remove_attempts: TimedCounter::default(),
            removals: CachePadded::new(AtomicU64::new(0)),
            hits: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
            evictions: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turns statistics collection on or off. Any change of state zeroes the
    /// accumulator so the new collection window starts clean.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.reset();
            info!(enabled, "cache statistics toggled");
        }
    }

    // == Record Get ==
    /// Records one logical read at the given cost. Both units land in the
    /// same hit or miss bucket.
    pub fn record_get(&self, hit: bool, cost: ReadCost, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        let units = cost.units();
        self.gets.add(units, elapsed);
        if hit {
            self.hits.fetch_add(units, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(units, Ordering::Relaxed);
        }
    }

    // == Record Put ==
    /// Records one written key.
    pub fn record_put(&self, elapsed: Duration) {
        if self.is_enabled() {
            self.puts.add(1, elapsed);
        }
    }

    // == Record Remove ==
    /// Records a remove attempt. Only an actual deletion counts as a removal,
    /// but the time is always accounted.
    pub fn record_remove(&self, elapsed: Duration, removed: bool) {
        if !self.is_enabled() {
            return;
        }
        self.remove_attempts.add(1, elapsed);
        if removed {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
    }

    // == Record Eviction ==
    pub fn record_eviction(&self) {
        if self.is_enabled() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    // == Snapshot ==
    /// Returns a fresh copy of the current values.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            puts: self.puts.count.load(Ordering::Relaxed),
            gets: self.gets.count.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            avg_get_time: self.gets.average_millis(),
            avg_put_time: self.puts.average_millis(),
            avg_remove_time: self.remove_attempts.average_millis(),
        }
    }

    // == Reset ==
    pub fn reset(&self) {
        self.gets.reset();
        self.puts.reset();
        self.remove_attempts.reset();
        self.removals.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

// == Metrics Snapshot ==
/// Point-in-time, immutable view of a cache's metrics. Average times are in
/// milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub removals: u64,
    pub evictions: u64,
    pub hits: u64,
    pub misses: u64,
    pub avg_get_time: f64,
    pub avg_put_time: f64,
    pub avg_remove_time: f64,
}

impl CacheMetricsSnapshot {
    /// Percentage of read units that were hits, `0.0` with no reads.
    pub fn hit_percentage(&self) -> f64 {
        percentage(self.hits, self.gets)
    }

    /// Percentage of read units that were misses, `0.0` with no reads.
    pub fn miss_percentage(&self) -> f64 {
        percentage(self.misses, self.gets)
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
