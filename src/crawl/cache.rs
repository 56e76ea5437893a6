//! TTL cache with single-flight coalescing
//!
//! `get_or_fetch` guarantees that, per fingerprint, at most one upstream
//! fetch is running at any instant across the whole process. Concurrent
//! callers for the same key attach to the in-flight fetch and receive the
//! leader's result; later callers within the TTL window are served from the
//! cache without touching the upstream at all.
//!
//! Transport errors are cached exactly like status codes. Repeating a
//! failing upstream inside one batch would only burn the deadline budget;
//! the TTL expiring is what re-opens the door to a retry.

use std::future::Future;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use super::UrlOutcome;

/// How long a materialized fetch outcome may be served from cache.
pub const CACHE_TTL: Duration = Duration::from_secs(1);

/// One materialized outcome. Immutable once written; a refresh replaces the
/// whole entry.
struct CacheEntry {
    outcome: UrlOutcome,
    expires_at: Instant,
}

/// What a caller turned out to be for one pass of the lookup loop.
enum Role {
    Leader(broadcast::Sender<UrlOutcome>),
    Follower(broadcast::Receiver<UrlOutcome>),
}

/// Fingerprint-keyed outcome cache with request coalescing
pub struct FetchCache {
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, broadcast::Sender<UrlOutcome>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Look up `key`, coalescing concurrent misses into one `produce` call.
    ///
    /// The leader runs `produce`, writes the cache, and wakes all followers
    /// with the same outcome. If a leader is dropped mid-produce its channel
    /// closes without a value and the followers take another lap, so a
    /// cancelled batch never wedges callers from other batches.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, produce: F) -> UrlOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = UrlOutcome>,
    {
        loop {
            if let Some(outcome) = self.fresh(key) {
                return outcome;
            }

            // The entry guard is held only for this match; no awaits happen
            // while a shard is locked.
            let role = match self.in_flight.entry(key.to_string()) {
                Entry::Occupied(occupied) => Role::Follower(occupied.get().subscribe()),
                Entry::Vacant(vacant) => {
                    let (tx, _rx) = broadcast::channel(1);
                    vacant.insert(tx.clone());
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Follower(mut rx) => {
                    debug!(key, "joining in-flight fetch");
                    match rx.recv().await {
                        Ok(outcome) => return outcome,
                        Err(_) => continue,
                    }
                }
                Role::Leader(tx) => {
                    let leader = Leader {
                        cache: self,
                        key,
                        tx: Some(tx),
                    };
                    // A previous leader may have refreshed the entry between
                    // our cache miss and winning the in-flight slot.
                    if let Some(outcome) = self.fresh(key) {
                        return leader.publish(outcome);
                    }
                    let outcome = produce().await;
                    self.store(key, outcome.clone());
                    return leader.publish(outcome);
                }
            }
        }
    }

    /// Return the cached outcome for `key` if it has not expired, removing
    /// it lazily if it has.
    fn fresh(&self, key: &str) -> Option<UrlOutcome> {
        let mut expired = false;
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.outcome.clone());
            }
            expired = true;
        }
        if expired {
            // The read guard is gone; re-check under the write lock so a
            // concurrent refresh is not evicted by a reader that saw the
            // stale entry.
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }
        None
    }

    fn store(&self, key: &str, outcome: UrlOutcome) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                outcome,
                expires_at: Instant::now() + CACHE_TTL,
            },
        );
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks leadership of one in-flight fetch.
///
/// `publish` retires the in-flight entry and wakes followers; if the leader
/// future is dropped instead, `Drop` retires the entry without a value so
/// followers retry rather than wait forever.
struct Leader<'a> {
    cache: &'a FetchCache,
    key: &'a str,
    tx: Option<broadcast::Sender<UrlOutcome>>,
}

impl Leader<'_> {
    fn publish(mut self, outcome: UrlOutcome) -> UrlOutcome {
        self.cache.in_flight.remove(self.key);
        if let Some(tx) = self.tx.take() {
            // No followers is fine; the send result is irrelevant.
            let _ = tx.send(outcome.clone());
        }
        outcome
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.cache.in_flight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_produce(
        calls: Arc<AtomicUsize>,
        outcome: UrlOutcome,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = UrlOutcome> + Send>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    #[tokio::test]
    async fn test_second_lookup_within_ttl_is_served_from_cache() {
        let cache = FetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let produce = counting_produce(calls.clone(), UrlOutcome::Status(204));

        assert_eq!(cache.get_or_fetch("k", &produce).await, UrlOutcome::Status(204));
        assert_eq!(cache.get_or_fetch("k", &produce).await, UrlOutcome::Status(204));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_a_fresh_fetch() {
        let cache = FetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let produce = counting_produce(calls.clone(), UrlOutcome::Status(200));

        cache.get_or_fetch("k", &produce).await;
        tokio::time::sleep(CACHE_TTL + Duration::from_millis(50)).await;
        cache.get_or_fetch("k", &produce).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_coalesce_into_one_fetch() {
        let cache = Arc::new(FetchCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k", || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            UrlOutcome::Status(200)
                        }
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), UrlOutcome::Status(200));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_cached_like_statuses() {
        let cache = FetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let produce = counting_produce(
            calls.clone(),
            UrlOutcome::Failed("connection refused".to_string()),
        );

        let first = cache.get_or_fetch("k", &produce).await;
        let second = cache.get_or_fetch("k", &produce).await;

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_leader_does_not_strand_followers() {
        let cache = Arc::new(FetchCache::new());

        let stuck = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", || async {
                        std::future::pending::<()>().await;
                        unreachable!()
                    })
                    .await
            })
        };

        // Let the stuck leader claim the in-flight slot, then kill it.
        tokio::task::yield_now().await;
        stuck.abort();
        let _ = stuck.await;

        let outcome = cache
            .get_or_fetch("k", || async { UrlOutcome::Status(200) })
            .await;
        assert_eq!(outcome, UrlOutcome::Status(200));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let cache = FetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let produce = counting_produce(calls.clone(), UrlOutcome::Status(200));

        cache.get_or_fetch("a", &produce).await;
        cache.get_or_fetch("b", &produce).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
