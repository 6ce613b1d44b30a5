//! Cache Entry Module
//!
//! A stored value with its expiry state and logical-removal flag.

use serde::Serialize;

use crate::cache::expiry::EntryExpiryState;

// == Cache Entry ==
/// One slot in a node's store.
///
/// An entry marked obsolete is logically absent: readers treat it as missing
/// even though the slot (and possibly the raw value) has not been reclaimed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: String,
    expiry: EntryExpiryState,
    obsolete: bool,
}

impl CacheEntry {
    // == Constructor ==
    pub fn new(value: String, expiry: EntryExpiryState) -> Self {
        Self {
            value,
            expiry,
            obsolete: false,
        }
    }

    /// The value if the entry is live at `now`.
    pub fn live_value(&self, now_millis: u64) -> Option<&str> {
        if self.is_logically_absent(now_millis) {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Raw stored value regardless of logical state.
    pub fn raw_value(&self) -> &str {
        &self.value
    }

    pub fn expiry(&self) -> EntryExpiryState {
        self.expiry
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    /// Obsolete, or past its expire time at `now`.
    pub fn is_logically_absent(&self, now_millis: u64) -> bool {
        self.obsolete || self.expiry.is_expired(now_millis)
    }

    /// Replaces the value. `expiry` of `None` keeps the current expiry state.
    pub fn update(&mut self, value: String, expiry: Option<EntryExpiryState>) {
        self.value = value;
        if let Some(expiry) = expiry {
            self.expiry = expiry;
        }
    }

    pub fn set_expiry(&mut self, expiry: EntryExpiryState) {
        self.expiry = expiry;
    }

    /// Marks the entry logically absent. The old expiry state no longer
    /// applies to anything, so it is cleared.
    pub fn mark_obsolete(&mut self) {
        self.obsolete = true;
        self.expiry = EntryExpiryState::ETERNAL;
    }

    pub fn probe(&self, now_millis: u64) -> EntryProbe {
        EntryProbe {
            ttl: self.expiry.ttl(),
            expire_time: self.expiry.expire_time(),
            logically_absent: self.is_logically_absent(now_millis),
            obsolete: self.obsolete,
        }
    }
}

// == Entry Probe ==
/// Read-only diagnostic view of a stored slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryProbe {
    pub ttl: u64,
    pub expire_time: u64,
    pub logically_absent: bool,
    /// Marked removed but not yet reclaimed.
    pub obsolete: bool,
}
