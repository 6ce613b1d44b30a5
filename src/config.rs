//! Configuration Module
//!
//! Loads the server and grid configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheMode, NodeId};

/// Settings shared by every node of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub mode: CacheMode,
    /// Backup copies per key in partitioned mode.
    pub backups: u32,
    pub statistics_enabled: bool,
    /// Removal marks entries obsolete and leaves reclamation to the sweep.
    pub deferred_delete: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Partitioned,
            backups: 0,
            statistics_enabled: true,
            deferred_delete: false,
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables; unset or
/// unparsable values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Nodes in the in-process grid
    pub node_count: u32,
    /// Node the HTTP surface operates on
    pub local_node: NodeId,
    pub cache_mode: CacheMode,
    pub backups: u32,
    pub statistics_enabled: bool,
    pub deferred_delete: bool,
    /// Interval between background expiration passes in milliseconds
    pub sweep_interval_ms: u64,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NODE_COUNT` - Grid nodes (default: 1)
    /// - `LOCAL_NODE` - Node served over HTTP (default: 0)
    /// - `CACHE_MODE` - `partitioned` or `replicated` (default: partitioned)
    /// - `BACKUPS` - Backups per key (default: 0)
    /// - `STATISTICS_ENABLED` - Collect metrics (default: true)
    /// - `DEFERRED_DELETE` - Tombstone removed entries (default: false)
    /// - `SWEEP_INTERVAL_MS` - Expiration pass frequency (default: 1000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let node_count = parse_var("NODE_COUNT")
            .filter(|count| *count > 0)
            .unwrap_or(defaults.node_count);
        let local_node = parse_var("LOCAL_NODE")
            .filter(|node| *node < node_count)
            .map(NodeId)
            .unwrap_or(defaults.local_node);

        Self {
            node_count,
            local_node,
            cache_mode: parse_var("CACHE_MODE").unwrap_or(defaults.cache_mode),
            backups: parse_var("BACKUPS").unwrap_or(defaults.backups),
            statistics_enabled: parse_var("STATISTICS_ENABLED")
                .unwrap_or(defaults.statistics_enabled),
            deferred_delete: parse_var("DEFERRED_DELETE").unwrap_or(defaults.deferred_delete),
            sweep_interval_ms: parse_var("SWEEP_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.sweep_interval_ms),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            mode: self.cache_mode,
            backups: self.backups,
            statistics_enabled: self.statistics_enabled,
            deferred_delete: self.deferred_delete,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: 1,
            local_node: NodeId(0),
            cache_mode: CacheMode::Partitioned,
            backups: 0,
            statistics_enabled: true,
            deferred_delete: false,
            sweep_interval_ms: 1000,
            server_port: 3000,
        }
    }
}
