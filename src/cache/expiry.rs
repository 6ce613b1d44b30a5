//! Expiry Module
//!
//! Per-entry TTL state and the expiry policies that drive it.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;

// == Entry Expiry State ==
/// TTL and absolute expire time of one entry, both in milliseconds.
///
/// `ttl_millis == 0` and `expire_at_millis == 0` together mean "never expires";
/// one is never zero without the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryExpiryState {
    ttl_millis: u64,
    expire_at_millis: u64,
}

impl EntryExpiryState {
    /// No expiration.
    pub const ETERNAL: Self = Self {
        ttl_millis: 0,
        expire_at_millis: 0,
    };

    /// State for a TTL counted from `now`. A zero TTL rounds up to 1 ms.
    pub fn expiring(ttl: Duration, now_millis: u64) -> Self {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        Self {
            ttl_millis,
            expire_at_millis: now_millis.saturating_add(ttl_millis),
        }
    }

    /// TTL in milliseconds, 0 when the entry never expires.
    pub fn ttl(&self) -> u64 {
        self.ttl_millis
    }

    /// Absolute expire time in Unix milliseconds, 0 when the entry never expires.
    pub fn expire_time(&self) -> u64 {
        self.expire_at_millis
    }

    pub fn is_eternal(&self) -> bool {
        self.expire_at_millis == 0
    }

    /// Expired once `now >= expire_at`.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        !self.is_eternal() && now_millis >= self.expire_at_millis
    }
}

// == Access Kind ==
/// The kind of access an expiry policy is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Created,
    Updated,
    Accessed,
}

/// Outcome a policy can specify for an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDuration {
    Eternal,
    Ttl(Duration),
}

// == Expiry Policy ==
/// Maps an access to a new expiry outcome.
///
/// `Ok(None)` means the policy leaves the entry's current expiry untouched.
pub trait ExpiryPolicy: Send + Sync + fmt::Debug {
    fn expiry_for(&self, kind: AccessKind) -> Result<Option<ExpiryDuration>>;
}

/// Evaluates `policy` for `kind` at `now`.
///
/// Returns `None` when the entry's expiry state must be left as is, either
/// because the policy declined or because it failed. Failures are logged and
/// never surface to the caller.
pub fn apply_policy(
    kind: AccessKind,
    policy: &dyn ExpiryPolicy,
    now_millis: u64,
) -> Option<EntryExpiryState> {
    match policy.expiry_for(kind) {
        Ok(Some(ExpiryDuration::Eternal)) => Some(EntryExpiryState::ETERNAL),
        Ok(Some(ExpiryDuration::Ttl(ttl))) => Some(EntryExpiryState::expiring(ttl, now_millis)),
        Ok(None) => None,
        Err(err) => {
            warn!(?kind, ?policy, error = %err, "expiry policy failed, keeping current expiry");
            None
        }
    }
}

// == Standard Policies ==

/// TTL restarts on every creation, update and read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchedExpiryPolicy(pub Duration);

impl ExpiryPolicy for TouchedExpiryPolicy {
    fn expiry_for(&self, _kind: AccessKind) -> Result<Option<ExpiryDuration>> {
        Ok(Some(ExpiryDuration::Ttl(self.0)))
    }
}

/// TTL is set once on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedExpiryPolicy(pub Duration);

impl ExpiryPolicy for CreatedExpiryPolicy {
    fn expiry_for(&self, kind: AccessKind) -> Result<Option<ExpiryDuration>> {
        Ok(match kind {
            AccessKind::Created => Some(ExpiryDuration::Ttl(self.0)),
            AccessKind::Updated | AccessKind::Accessed => None,
        })
    }
}

/// TTL restarts on creation and update, reads leave it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifiedExpiryPolicy(pub Duration);

impl ExpiryPolicy for ModifiedExpiryPolicy {
    fn expiry_for(&self, kind: AccessKind) -> Result<Option<ExpiryDuration>> {
        Ok(match kind {
            AccessKind::Created | AccessKind::Updated => Some(ExpiryDuration::Ttl(self.0)),
            AccessKind::Accessed => None,
        })
    }
}

/// TTL restarts on creation and read, updates leave it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessedExpiryPolicy(pub Duration);

impl ExpiryPolicy for AccessedExpiryPolicy {
    fn expiry_for(&self, kind: AccessKind) -> Result<Option<ExpiryDuration>> {
        Ok(match kind {
            AccessKind::Created | AccessKind::Accessed => Some(ExpiryDuration::Ttl(self.0)),
            AccessKind::Updated => None,
        })
    }
}

/// Created entries never expire; later accesses change nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EternalExpiryPolicy;

impl ExpiryPolicy for EternalExpiryPolicy {
    fn expiry_for(&self, kind: AccessKind) -> Result<Option<ExpiryDuration>> {
        Ok(match kind {
            AccessKind::Created => Some(ExpiryDuration::Eternal),
            AccessKind::Updated | AccessKind::Accessed => None,
        })
    }
}
