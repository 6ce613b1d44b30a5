//! Expiration Sweep Task
//!
//! Background task that periodically expires entries past their TTL and
//! reclaims logically removed slots on every node of a grid.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::Grid;

/// Spawns a background task that runs an expiration pass over the grid
/// every `interval`.
///
/// Nodes whose sweep is paused are skipped. Every completed pass on a node
/// is published on that node's sweep signal, which is what
/// [`Grid::wait_until_absent`] listens to.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_sweep_task(grid: Arc<Grid>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting expiration sweep task");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let report = grid.sweep_expired();
            if report.expired > 0 || report.reclaimed > 0 {
                info!(
                    expired = report.expired,
                    reclaimed = report.reclaimed,
                    deferred = report.deferred,
                    "expiration sweep"
                );
            } else {
                debug!(deferred = report.deferred, "expiration sweep: nothing expired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMode, HashAffinity, ManualClock, NodeId, TouchedExpiryPolicy};
    use crate::config::CacheConfig;

    fn grid_with_clock() -> (Arc<Grid>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let grid = Grid::new(
            Arc::new(HashAffinity::new(2, 0, CacheMode::Replicated)),
            clock.clone(),
            CacheConfig::default(),
        );
        (Arc::new(grid), clock)
    }

    #[tokio::test]
    async fn test_sweep_task_reclaims_expired_entries() {
        let (grid, clock) = grid_with_clock();
        let cache = grid
            .cache(NodeId(0))
            .unwrap()
            .with_expiry_policy(TouchedExpiryPolicy(Duration::from_millis(50)));
        cache.put("expire_soon", "value").unwrap();
        clock.advance(Duration::from_millis(100));

        let handle = spawn_sweep_task(grid.clone(), Duration::from_millis(10));

        for node in [NodeId(0), NodeId(1)] {
            let gone = grid
                .wait_until_absent(node, "expire_soon", Duration::from_secs(2))
                .await
                .unwrap();
            assert!(gone, "expired entry should have been reclaimed on {node}");
            assert!(grid.cache(node).unwrap().probe("expire_soon").is_none());
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_preserves_valid_entries() {
        let (grid, clock) = grid_with_clock();
        let cache = grid.cache(NodeId(0)).unwrap();
        cache
            .with_expiry_policy(TouchedExpiryPolicy(Duration::from_secs(3600)))
            .put("long_lived", "value")
            .unwrap();
        clock.advance(Duration::from_secs(1));

        let handle = spawn_sweep_task(grid.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("long_lived").as_deref(), Some("value"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_skips_paused_nodes() {
        let (grid, clock) = grid_with_clock();
        grid.cache(NodeId(0))
            .unwrap()
            .with_expiry_policy(TouchedExpiryPolicy(Duration::from_millis(50)))
            .put("k", "v")
            .unwrap();
        clock.advance(Duration::from_millis(100));
        grid.node(NodeId(1)).unwrap().pause_sweep();

        let handle = spawn_sweep_task(grid.clone(), Duration::from_millis(10));
        assert!(grid
            .wait_until_absent(NodeId(0), "k", Duration::from_secs(2))
            .await
            .unwrap());

        // Logically gone on the paused node, but its slot is still there.
        let paused = grid.cache(NodeId(1)).unwrap();
        assert!(paused.is_logically_absent("k"));
        assert!(paused.probe("k").is_some());

        grid.node(NodeId(1)).unwrap().resume_sweep();
        assert!(grid
            .wait_until_absent(NodeId(1), "k", Duration::from_secs(2))
            .await
            .unwrap());
        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let (grid, _) = grid_with_clock();
        let handle = spawn_sweep_task(grid, Duration::from_millis(10));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
