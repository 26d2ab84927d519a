//! Bounded, TTL-aware memoization of identity lookups.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{Identity, IdentitySource};
use crate::clock::Clock;

/// Default entry lifetime, 2 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);
/// Default maximum number of cached principals.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Wrap an [`IdentitySource`] and remember its answers for a while.
///
/// Unknown principals are never cached. When full, expired entries are
/// purged first; if nothing can be purged the answer is returned uncached.
pub struct CachedIdentitySource {
    inner: Arc<dyn IdentitySource>,
    entries: DashMap<String, (DateTime<Utc>, Identity)>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    capacity: usize,
}

impl CachedIdentitySource {
    /// Create a new [`CachedIdentitySource`].
    pub fn new(
        inner: Arc<dyn IdentitySource>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            capacity,
        }
    }

    /// Drop the cached entry of a principal, e.g. after a role change.
    pub fn invalidate(&self, principal: &str) {
        self.entries.remove(principal);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, (expires_at, _)| *expires_at > now);
    }
}

impl std::fmt::Debug for CachedIdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedIdentitySource")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl IdentitySource for CachedIdentitySource {
    fn lookup(&self, principal: &str) -> Option<Identity> {
        let now = self.clock.now();

        let cached = self
            .entries
            .get(principal)
            .filter(|entry| entry.0 > now)
            .map(|entry| entry.1.clone());
        if cached.is_some() {
            return cached;
        }

        let identity = self.inner.lookup(principal)?;

        if self.entries.len() >= self.capacity {
            self.purge(now);
        }
        if self.entries.len() < self.capacity {
            let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.entries
                .insert(principal.to_owned(), (expires_at, identity.clone()));
        } else {
            tracing::debug!(capacity = self.capacity, "identity cache full");
        }

        Some(identity)
    }
}
