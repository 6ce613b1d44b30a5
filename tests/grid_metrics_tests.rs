//! Integration Tests for Grid Metrics
//!
//! Drives single- and multi-node grids and checks the per-node counters.

use std::sync::Arc;

use grid_cache::cache::{
    AffinityOracle, CacheMetricsSnapshot, CacheMode, Grid, HashAffinity, ManualClock, NodeId,
    ReadCost,
};
use grid_cache::config::CacheConfig;

// == Helper Functions ==

fn grid(nodes: u32, backups: u32, mode: CacheMode) -> Grid {
    Grid::new(
        Arc::new(HashAffinity::new(nodes, backups, mode)),
        Arc::new(ManualClock::new(1_000_000)),
        CacheConfig::default(),
    )
}

fn hash_affinity(nodes: u32, backups: u32, mode: CacheMode) -> HashAffinity {
    HashAffinity::new(nodes, backups, mode)
}

// == Single Node ==

#[test]
fn test_writes_without_reads() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();

    for i in 0..50 {
        cache.put(&i.to_string(), i.to_string()).unwrap();
    }

    let snap = cache.metrics();
    assert_eq!(snap.puts, 50);
    assert_eq!(snap.hits, 0);
    assert_eq!(snap.misses, 0);
    assert_eq!(snap.gets, 0);
    assert!(snap.avg_put_time >= 0.0);
}

#[test]
fn test_reads_after_writes_are_all_hits() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();

    for i in 0..50 {
        cache.put(&i.to_string(), i.to_string()).unwrap();
    }
    for i in 0..50 {
        assert_eq!(cache.get(&i.to_string()), Some(i.to_string()));
    }

    let snap = cache.metrics();
    assert_eq!(snap.hits, 50);
    assert_eq!(snap.misses, 0);
    assert_eq!(snap.gets, 50);
    assert_eq!(snap.hit_percentage(), 100.0);
    assert_eq!(snap.miss_percentage(), 0.0);
}

#[test]
fn test_mixed_hits_and_misses() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();

    for i in 0..10 {
        cache.put(&i.to_string(), "v").unwrap();
    }
    // 10 hits, then 5 misses
    for i in 0..15 {
        cache.get(&i.to_string());
    }

    let snap = cache.metrics();
    assert_eq!(snap.hits, 10);
    assert_eq!(snap.misses, 5);
    assert_eq!(snap.hits + snap.misses, snap.gets);
    assert!(snap.avg_get_time >= 0.0);
}

#[test]
fn test_snapshots_are_value_equal_and_independent() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();
    cache.put("k", "v").unwrap();
    cache.get("k");

    let first = cache.metrics();
    let second = cache.metrics();
    assert_eq!(first, second);

    cache.get("k");
    assert_eq!(first.gets, 1);
    assert_eq!(cache.metrics().gets, 2);
}

#[test]
fn test_evict_and_remove_counters() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();
    cache.put("evicted", "v").unwrap();
    cache.put("removed", "v").unwrap();

    assert!(cache.evict("evicted"));
    let snap = cache.metrics();
    assert_eq!(snap.evictions, 1);
    assert_eq!(snap.removals, 0);

    assert!(cache.remove("removed").unwrap());
    let snap = cache.metrics();
    assert_eq!(snap.evictions, 1);
    assert_eq!(snap.removals, 1);
    assert!(snap.avg_remove_time >= 0.0);
}

#[test]
fn test_remove_of_missing_key_is_not_a_removal() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();

    assert!(!cache.remove("missing").unwrap());
    assert_eq!(cache.metrics().removals, 0);
}

#[test]
fn test_disabled_statistics_record_nothing() {
    let grid = Grid::new(
        Arc::new(HashAffinity::single_node()),
        Arc::new(ManualClock::new(0)),
        CacheConfig {
            statistics_enabled: false,
            ..CacheConfig::default()
        },
    );
    let cache = grid.cache(NodeId(0)).unwrap();
    cache.put("k", "v").unwrap();
    cache.get("k");
    assert_eq!(cache.metrics(), CacheMetricsSnapshot::default());

    grid.set_statistics_enabled(true);
    cache.get("k");
    assert_eq!(cache.metrics().hits, 1);
}

#[test]
fn test_reset_metrics_and_clear() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();
    cache.put("k", "v").unwrap();
    cache.get("k");

    grid.reset_metrics();
    assert_eq!(cache.metrics().gets, 0);
    assert_eq!(cache.get("k").as_deref(), Some("v"));

    assert_eq!(grid.clear(), 1);
    assert_eq!(cache.metrics().gets, 0);
    assert!(cache.is_empty());
}

#[test]
fn test_get_all_counts_each_key() {
    let grid = grid(1, 0, CacheMode::Partitioned);
    let cache = grid.cache(NodeId(0)).unwrap();
    cache.put_all([("a", "1"), ("b", "2")]).unwrap();

    let found = cache.get_all(["a", "b", "c"]);
    assert_eq!(found.len(), 2);
    assert_eq!(found.get("b").map(String::as_str), Some("2"));

    let snap = cache.metrics();
    assert_eq!(snap.gets, 3);
    assert_eq!(snap.hits, 2);
    assert_eq!(snap.misses, 1);
}

// == Multi Node ==

#[test]
fn test_partitioned_read_on_primary_costs_one() {
    let affinity = hash_affinity(3, 1, CacheMode::Partitioned);
    let grid = grid(3, 1, CacheMode::Partitioned);
    let node = NodeId(1);
    let key = &affinity.primary_keys(node, 1)[0];
    let cache = grid.cache(node).unwrap();

    cache.put(key, "v").unwrap();
    cache.get(key);

    let snap = cache.metrics();
    assert_eq!(snap.gets, 1);
    assert_eq!(snap.hits, 1);
}

#[test]
fn test_partitioned_read_off_primary_costs_two() {
    let affinity = hash_affinity(3, 1, CacheMode::Partitioned);
    let grid = grid(3, 1, CacheMode::Partitioned);
    let reader = NodeId(2);
    let key = &affinity.foreign_keys(reader, 1)[0];
    assert_eq!(affinity.read_cost(reader, key), ReadCost::WithRemoteFetch);

    let cache = grid.cache(reader).unwrap();
    assert_eq!(cache.get(key), None);
    let snap = cache.metrics();
    assert_eq!(snap.gets, 2);
    assert_eq!(snap.misses, 2);
    assert_eq!(snap.hits, 0);

    cache.put(key, "v").unwrap();
    assert_eq!(cache.get(key).as_deref(), Some("v"));
    let snap = cache.metrics();
    assert_eq!(snap.gets, 4);
    assert_eq!(snap.hits, 2);
    // The writer holds no copy, so it records no put.
    assert_eq!(snap.puts, 0);
}

#[test]
fn test_backup_read_costs_two() {
    let affinity = hash_affinity(3, 1, CacheMode::Partitioned);
    let grid = grid(3, 1, CacheMode::Partitioned);
    let key = "backup-key";
    let owners = affinity.owners(key);
    let backup = owners[1];

    grid.cache(owners[0]).unwrap().put(key, "v").unwrap();
    let cache = grid.cache(backup).unwrap();
    assert_eq!(cache.get(key).as_deref(), Some("v"));
    assert_eq!(cache.metrics().hits, 2);
    assert_eq!(cache.metrics().puts, 1);
}

#[test]
fn test_replicated_reads_cost_two_everywhere() {
    let grid = grid(3, 0, CacheMode::Replicated);
    let writer = grid.cache(NodeId(0)).unwrap();
    writer.put("k", "v").unwrap();

    for node in 0..3 {
        let cache = grid.cache(NodeId(node)).unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.get("missing"), None);

        let snap = cache.metrics();
        assert_eq!(snap.puts, 1, "every replica records the write");
        assert_eq!(snap.gets, 4);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 2);
    }
}

#[test]
fn test_evict_drops_only_local_copy() {
    let grid = grid(2, 0, CacheMode::Replicated);
    grid.cache(NodeId(0)).unwrap().put("k", "v").unwrap();

    let local = grid.cache(NodeId(1)).unwrap();
    assert!(local.evict("k"));
    assert!(local.get("k").is_none());
    assert_eq!(local.metrics().evictions, 1);

    let other = grid.cache(NodeId(0)).unwrap();
    assert_eq!(other.get("k").as_deref(), Some("v"));
    assert_eq!(other.metrics().evictions, 0);
}

#[test]
fn test_unknown_node_is_rejected() {
    let grid = grid(2, 0, CacheMode::Partitioned);
    assert!(grid.cache(NodeId(2)).is_err());
    assert!(grid.metrics(NodeId(5)).is_err());
}

#[test]
fn test_concurrent_reads_and_writes_keep_counters_consistent() {
    let grid = Arc::new(grid(2, 1, CacheMode::Partitioned));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let grid = grid.clone();
            std::thread::spawn(move || {
                let cache = grid.cache(NodeId(t % 2)).unwrap();
                for i in 0..200 {
                    let key = format!("{}", i % 20);
                    if i % 3 == 0 {
                        cache.put(&key, "v").unwrap();
                    } else {
                        cache.get(&key);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for node in 0..2 {
        let snap = grid.metrics(NodeId(node)).unwrap();
        assert_eq!(snap.hits + snap.misses, snap.gets);
        assert!(snap.gets > 0);
    }
    // Each key has two copies on a two-node grid with one backup.
    let total_puts: u64 = (0..2)
        .map(|node| grid.metrics(NodeId(node)).unwrap().puts)
        .sum();
    assert_eq!(total_puts, 4 * 67 * 2);
}
