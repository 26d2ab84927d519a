//! Server-side revocation of tokens not yet expired.
//!
//! Entries map a token id to the instant the token expires. Once that
//! instant is past the entry is redundant, the expiry check alone rejects
//! the token, so entries are evicted on lookup and by periodic sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::clock::Clock;

/// Default soft bound before an insert triggers a sweep.
pub const MAX_ENTRIES: usize = 100_000;

/// Store of revoked token ids.
///
/// Implementations must be safe to call from many threads at once. A
/// shared backend (cache, database) can stand behind this trait without
/// changing any caller.
pub trait RevocationStore: Send + Sync {
    /// Revoke `token_id` until `expires_at`. Revoking twice overwrites.
    fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>);

    /// Whether `token_id` is revoked and not yet expired.
    fn is_revoked(&self, token_id: &str) -> bool;

    /// Remove every entry with `expires_at < now`, returning how many went.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory revocation store.
///
/// A process restart clears it, and it is not shared between instances.
pub struct MemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl MemoryRevocationStore {
    /// Create a new [`MemoryRevocationStore`].
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_max_entries(clock, MAX_ENTRIES)
    }

    /// Create a store sweeping inline once it holds more than `max_entries`.
    pub fn with_max_entries(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries,
        }
    }
}

impl std::fmt::Debug for MemoryRevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRevocationStore")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl RevocationStore for MemoryRevocationStore {
    fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) {
        self.entries.insert(token_id.to_owned(), expires_at);
        tracing::info!(%token_id, %expires_at, "token revoked");
        metrics::counter!("auth_revocations_total").increment(1);

        if self.entries.len() > self.max_entries {
            let swept = self.sweep(self.clock.now());
            if self.entries.len() > self.max_entries {
                // Live entries are never dropped to honour the bound.
                tracing::warn!(
                    entries = self.entries.len(),
                    max_entries = self.max_entries,
                    swept,
                    "revocation store above its bound"
                );
            }
        }

        metrics::gauge!("auth_revocations_active").set(self.entries.len() as f64);
    }

    fn is_revoked(&self, token_id: &str) -> bool {
        let now = self.clock.now();
        let expired = match self.entries.get(token_id) {
            Some(expires_at) => now > *expires_at,
            None => return false,
        };

        if expired {
            // The guard is released: evict without holding the shard.
            self.entries.remove_if(token_id, |_, expires_at| now > *expires_at);
            tracing::trace!(%token_id, "evicted stale revocation entry");
            return false;
        }

        true
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at >= now);
        let swept = before.saturating_sub(self.entries.len());

        tracing::debug!(swept, remaining = self.entries.len(), "revocation entries swept");
        metrics::counter!("auth_revocations_swept_total").increment(swept as u64);
        metrics::gauge!("auth_revocations_active").set(self.entries.len() as f64);

        swept
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Run [`RevocationStore::sweep`] every `period` on the tokio runtime.
///
/// Must be called from within a runtime. Abort the handle to stop it.
pub fn spawn_sweeper(
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            store.sweep(clock.now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn store() -> (Arc<FixedClock>, MemoryRevocationStore) {
        let clock = Arc::new(FixedClock::new(start()));
        let store = MemoryRevocationStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_revoke() {
        let (_, store) = store();
        assert!(!store.is_revoked("a"));

        store.revoke("a", start() + chrono::Duration::hours(1));
        assert!(store.is_revoked("a"));
        assert!(!store.is_revoked("b"));
    }

    #[test]
    fn test_revoke_idempotent() {
        let (_, store) = store();
        let expires_at = start() + chrono::Duration::hours(1);
        store.revoke("a", expires_at);
        store.revoke("a", expires_at);

        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("a"));
    }

    #[test]
    fn test_lazy_eviction() {
        let (clock, store) = store();
        store.revoke("a", start() + chrono::Duration::seconds(1));

        // Exactly on expiry the token is still acceptable, so still revoked.
        clock.advance(Duration::from_secs(1));
        assert!(store.is_revoked("a"));

        clock.advance(Duration::from_millis(1));
        assert!(!store.is_revoked("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep() {
        let (_, store) = store();
        store.revoke("past", start() - chrono::Duration::seconds(1));
        store.revoke("edge", start());
        store.revoke("future", start() + chrono::Duration::seconds(1));

        assert_eq!(store.sweep(start()), 1);
        assert_eq!(store.len(), 2);
        assert!(store.is_revoked("edge"));
        assert!(store.is_revoked("future"));

        // Idempotent.
        assert_eq!(store.sweep(start()), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_soft_bound() {
        let clock = Arc::new(FixedClock::new(start()));
        let store = MemoryRevocationStore::with_max_entries(clock.clone(), 2);
        store.revoke("a", start() + chrono::Duration::seconds(1));
        store.revoke("b", start() + chrono::Duration::seconds(1));

        clock.advance(Duration::from_secs(2));
        store.revoke("c", start() + chrono::Duration::hours(1));

        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("c"));
    }

    #[test]
    fn test_concurrent_access() {
        let (clock, store) = store();
        let store = Arc::new(store);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..500 {
                        let id = format!("{worker}-{i}");
                        let lifetime = chrono::Duration::milliseconds(i % 2);
                        store.revoke(&id, start() + lifetime);
                        store.is_revoked(&id);
                    }
                });
            }
            let sweeper = store.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    sweeper.sweep(start());
                }
            });
        });

        clock.advance(Duration::from_millis(5));
        store.sweep(clock.now());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper() {
        let (clock, store) = store();
        let store = Arc::new(store);
        store.revoke("a", start() + chrono::Duration::seconds(1));
        store.revoke("b", start() + chrono::Duration::hours(1));
        clock.advance(Duration::from_secs(2));

        let handle =
            spawn_sweeper(store.clone(), clock.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("b"));
    }
}
