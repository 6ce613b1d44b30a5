//! Cache Store Module
//!
//! Single-node storage: entries, transaction key locks and the
//! logical-then-physical removal of expired or deleted entries.

use std::collections::HashMap;

use serde::Serialize;

use crate::cache::entry::{CacheEntry, EntryProbe};
use crate::cache::expiry::EntryExpiryState;
use crate::cache::tx::TxId;
use crate::error::{CacheError, Result};

// == Sweep Report ==
/// Outcome of one expiration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries that became logically absent in this pass.
    pub expired: usize,
    /// Slots physically dropped in this pass.
    pub reclaimed: usize,
    /// Expired entries skipped because a transaction holds their lock.
    pub deferred: usize,
}

impl SweepReport {
    pub fn absorb(&mut self, other: SweepReport) {
        self.expired += other.expired;
        self.reclaimed += other.reclaimed;
        self.deferred += other.deferred;
    }
}

// == Cache Store ==
/// Storage for one node. Not synchronised; the owning node wraps it in a lock
/// so that value and expiry always change together.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    tx_locks: HashMap<String, TxId>,
    /// Removal only marks entries obsolete; a sweep reclaims them later.
    deferred_delete: bool,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(deferred_delete: bool) -> Self {
        Self {
            entries: HashMap::new(),
            tx_locks: HashMap::new(),
            deferred_delete,
        }
    }

    pub fn deferred_delete(&self) -> bool {
        self.deferred_delete
    }

    // == Read ==
    /// Returns the live value, expiring the entry on the spot if its time has
    /// passed. An expired entry locked by a transaction is hidden but left for
    /// the sweep.
    pub fn read(&mut self, key: &str, now: u64) -> Option<String> {
        let entry = self.entries.get(key)?;
        if let Some(value) = entry.live_value(now) {
            return Some(value.to_string());
        }
        if !entry.is_obsolete() && !self.tx_locks.contains_key(key) {
            self.drop_logically(key);
        }
        None
    }

    /// Side-effect free view of the live value.
    pub fn peek(&self, key: &str, now: u64) -> Option<&str> {
        self.entries.get(key)?.live_value(now)
    }

    pub fn is_logically_absent(&self, key: &str, now: u64) -> bool {
        self.peek(key, now).is_none()
    }

    /// Whether a slot exists for `key`, live or not.
    pub fn has_slot(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn probe(&self, key: &str, now: u64) -> Option<EntryProbe> {
        self.entries.get(key).map(|entry| entry.probe(now))
    }

    // == Expiry State ==
    /// Expiry state of a live entry, `None` when there is no slot.
    ///
    /// A slot that is logically absent but not yet reclaimed yields
    /// `EntryRemovedConcurrently`; retrying after reclamation returns `None`.
    pub fn expiry_state(&self, key: &str, now: u64) -> Result<Option<EntryExpiryState>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) if entry.is_logically_absent(now) => {
                Err(CacheError::EntryRemovedConcurrently(key.to_string()))
            }
            Some(entry) => Ok(Some(entry.expiry())),
        }
    }

    // == Write ==
    /// Writes `value`. On a live entry `expiry` of `None` keeps the current
    /// expiry state; anything else starts a fresh entry.
    ///
    /// Returns the previous live value.
    pub fn put(
        &mut self,
        key: &str,
        value: String,
        expiry: Option<EntryExpiryState>,
        now: u64,
    ) -> Option<String> {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_logically_absent(now) => {
                let previous = entry.raw_value().to_string();
                entry.update(value, expiry);
                Some(previous)
            }
            _ => {
                let entry = CacheEntry::new(value, expiry.unwrap_or(EntryExpiryState::ETERNAL));
                self.entries.insert(key.to_string(), entry);
                None
            }
        }
    }

    /// Replaces the expiry of a live entry. Returns false if there is none.
    pub fn refresh_expiry(&mut self, key: &str, expiry: EntryExpiryState, now: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_logically_absent(now) => {
                entry.set_expiry(expiry);
                true
            }
            _ => false,
        }
    }

    // == Remove ==
    /// Deletes a live entry, returning its value. Removing an expired entry
    /// finishes its expiration and returns `None`.
    pub fn remove(&mut self, key: &str, now: u64) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.is_obsolete() {
            return None;
        }
        let previous = entry.live_value(now).map(str::to_string);
        self.drop_logically(key);
        previous
    }

    // == Evict ==
    /// Drops the local copy of a live, unlocked entry outright.
    pub fn evict(&mut self, key: &str, now: u64) -> bool {
        if self.tx_locks.contains_key(key) || self.is_logically_absent(key, now) {
            return false;
        }
        self.entries.remove(key).is_some()
    }

    fn drop_logically(&mut self, key: &str) {
        if self.deferred_delete {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.mark_obsolete();
            }
        } else {
            self.entries.remove(key);
        }
    }

    // == Sweep ==
    /// Marks every unlocked entry whose expire time has passed as obsolete,
    /// then reclaims every unlocked obsolete slot.
    pub fn sweep_expired(&mut self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let locks = &self.tx_locks;

        self.entries.retain(|key, entry| {
            let locked = locks.contains_key(key);
            if !entry.is_obsolete() && entry.expiry().is_expired(now) {
                if locked {
                    report.deferred += 1;
                    return true;
                }
                entry.mark_obsolete();
                report.expired += 1;
            }
            if entry.is_obsolete() && !locked {
                report.reclaimed += 1;
                return false;
            }
            true
        });

        report
    }

    // == Transaction Locks ==
    /// Takes the key lock for `tx`. Re-entrant for the same transaction.
    pub fn lock(&mut self, key: &str, tx: TxId) -> Result<()> {
        self.check_lock(key, Some(tx))?;
        self.tx_locks.insert(key.to_string(), tx);
        Ok(())
    }

    /// Fails if `key` is locked by a transaction other than `tx`.
    pub fn check_lock(&self, key: &str, tx: Option<TxId>) -> Result<()> {
        match self.tx_locks.get(key) {
            Some(&holder) if Some(holder) != tx => Err(CacheError::LockConflict {
                key: key.to_string(),
                holder,
            }),
            _ => Ok(()),
        }
    }

    pub fn lock_holder(&self, key: &str) -> Option<TxId> {
        self.tx_locks.get(key).copied()
    }

    /// Releases every lock `tx` holds.
    pub fn release_locks(&mut self, tx: TxId) {
        self.tx_locks.retain(|_, holder| *holder != tx);
    }

    // == Clear ==
    /// Drops all entries and locks. Returns the number of slots dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.tx_locks.clear();
        count
    }

    // == Length ==
    /// Number of live entries at `now`.
    pub fn len(&self, now: u64) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.is_logically_absent(now))
            .count()
    }
}
