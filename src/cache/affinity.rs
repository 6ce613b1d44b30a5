//! Affinity Module
//!
//! Answers which nodes own a key and how a read on a given node is costed.

use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use ahash::RandomState;
use serde::Serialize;

use crate::cache::metrics::ReadCost;

// Fixed seeds keep key placement stable across nodes and restarts.
const AFFINITY_SEEDS: (u64, u64, u64, u64) = (
    0x5eed_0001_a11c_e5ed,
    0x0b5e_55ed_0002_cafe,
    0x7e57_0003_beef_f00d,
    0x0dd5_0004_face_b00c,
);

/// Identity of a node in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// How keys are distributed across the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Each key lives on one primary plus a configured number of backups.
    #[default]
    Partitioned,
    /// Every node holds every key.
    Replicated,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "partitioned" => Ok(CacheMode::Partitioned),
            "replicated" => Ok(CacheMode::Replicated),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

// == Affinity Oracle ==
/// Key ownership as seen by the cache. Owners are listed primary first.
pub trait AffinityOracle: Send + Sync + fmt::Debug {
    fn mode(&self) -> CacheMode;

    fn node_count(&self) -> u32;

    fn primary(&self, key: &str) -> NodeId;

    fn owners(&self, key: &str) -> Vec<NodeId>;

    fn is_primary(&self, node: NodeId, key: &str) -> bool {
        self.primary(key) == node
    }

    fn is_primary_or_backup(&self, node: NodeId, key: &str) -> bool {
        self.owners(key).contains(&node)
    }

    /// Cost of one logical read of `key` executed on `node`.
    fn read_cost(&self, node: NodeId, key: &str) -> ReadCost {
        if self.mode() == CacheMode::Partitioned && self.is_primary(node, key) {
            ReadCost::PrimaryLocal
        } else {
            ReadCost::WithRemoteFetch
        }
    }
}

// == Hash Affinity ==
/// Ring placement: the primary is `hash(key) mod n`, backups are the next
/// nodes around the ring.
#[derive(Debug, Clone)]
pub struct HashAffinity {
    node_count: u32,
    backups: u32,
    mode: CacheMode,
    hasher: RandomState,
}

impl HashAffinity {
    /// Backups are capped at `node_count - 1`. A zero node count is treated as one.
    pub fn new(node_count: u32, backups: u32, mode: CacheMode) -> Self {
        let node_count = node_count.max(1);
        let (a, b, c, d) = AFFINITY_SEEDS;
        Self {
            node_count,
            backups: backups.min(node_count - 1),
            mode,
            hasher: RandomState::with_seeds(a, b, c, d),
        }
    }

    pub fn single_node() -> Self {
        Self::new(1, 0, CacheMode::Partitioned)
    }

    pub fn backups(&self) -> u32 {
        self.backups
    }

    /// First `count` keys from `0, 1, 2, ...` whose primary is `node`. Empty
    /// when `node` is outside the grid.
    pub fn primary_keys(&self, node: NodeId, count: usize) -> Vec<String> {
        if node.0 >= self.node_count {
            return Vec::new();
        }
        (0u64..)
            .map(|i| i.to_string())
            .filter(|key| self.is_primary(node, key))
            .take(count)
            .collect()
    }

    /// First `count` keys from `0, 1, 2, ...` that `node` holds no copy of.
    /// Empty when every node owns every key.
    pub fn foreign_keys(&self, node: NodeId, count: usize) -> Vec<String> {
        let owns_everything = self.mode == CacheMode::Replicated
            || self.backups + 1 >= self.node_count;
        if owns_everything && node.0 < self.node_count {
            return Vec::new();
        }
        (0u64..)
            .map(|i| i.to_string())
            .filter(|key| !self.is_primary_or_backup(node, key))
            .take(count)
            .collect()
    }
}

impl AffinityOracle for HashAffinity {
    fn mode(&self) -> CacheMode {
        self.mode
    }

    fn node_count(&self) -> u32 {
        self.node_count
    }

    fn primary(&self, key: &str) -> NodeId {
        let hash = self.hasher.hash_one(key);
        NodeId((hash % u64::from(self.node_count)) as u32)
    }

    fn owners(&self, key: &str) -> Vec<NodeId> {
        let copies = match self.mode {
            CacheMode::Partitioned => self.backups + 1,
            CacheMode::Replicated => self.node_count,
        };
        let primary = self.primary(key).0;
        (0..copies)
            .map(|offset| NodeId((primary + offset) % self.node_count))
            .collect()
    }
}
