//! Generic keyed cache with per-entry TTL, LRU eviction, and single-flight
//! fill semantics. Used for quote fan-out, ETF holdings, and the cached
//! limit-up list.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Cumulative counters for [`TtlCache::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    pub size: u64,
}

enum Slot<V> {
    /// A value is being computed; waiters subscribe to `notify` and check
    /// `result` once woken.
    Loading {
        notify: Arc<Notify>,
        result: Arc<parking_lot::Mutex<Option<Result<V, String>>>>,
    },
    Ready {
        value: V,
        inserted_at: Instant,
        ttl: Duration,
        last_used: Instant,
    },
}

/// A concurrent, TTL-expiring, LRU-capped, single-flight cache.
///
/// Entry expiry is lazy on read and eager on write; a `ttl` of zero means
/// no expiry. Concurrent `get_or_fill` calls for the same key while a load
/// is in flight wait on that one computation instead of triggering their
/// own; if the loader fails, every waiter observes the failure and nothing
/// is cached.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, computing it with `loader` on a
    /// miss or expiry. The second element of the returned tuple is `true`
    /// iff this call actually invoked `loader` (a fill, not a hit).
    ///
    /// `loader` failures are reported as `anyhow::Error` (the crate-wide
    /// error type) and are never cached, so the next caller retries.
    pub async fn get_or_fill<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        loader: F,
    ) -> anyhow::Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        loop {
            // Fast path: a live, unexpired entry.
            if let Some(mut entry) = self.entries.get_mut(&key) {
                match &mut *entry {
                    Slot::Ready {
                        value,
                        inserted_at,
                        ttl: entry_ttl,
                        last_used,
                    } => {
                        let expired = !entry_ttl.is_zero() && inserted_at.elapsed() > *entry_ttl;
                        if !expired {
                            *last_used = Instant::now();
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok((value.clone(), false));
                        }
                    }
                    Slot::Loading { notify, result } => {
                        let notify = notify.clone();
                        let result = result.clone();
                        drop(entry);

                        // Build the `Notified` future and re-check `result`
                        // before awaiting it, so a loader that finishes and
                        // calls `notify_waiters()` between our drop(entry)
                        // above and the await below is never missed: the
                        // future registers itself as a waiter at creation,
                        // not at first poll.
                        let notified = notify.notified();
                        if let Some(got) = result.lock().clone() {
                            if got.is_ok() {
                                self.hits.fetch_add(1, Ordering::Relaxed);
                            }
                            return got.map(|v| (v, false)).map_err(anyhow::Error::msg);
                        }
                        notified.await;

                        let got = result.lock().clone();
                        if let Some(got) = got {
                            if got.is_ok() {
                                self.hits.fetch_add(1, Ordering::Relaxed);
                            }
                            return got.map(|v| (v, false)).map_err(anyhow::Error::msg);
                        }
                        // Spurious wake (shouldn't happen); retry the loop.
                        continue;
                    }
                }
            }

            // Miss (or expired): claim the single-flight slot ourselves.
            let notify = Arc::new(Notify::new());
            let result_slot = Arc::new(parking_lot::Mutex::new(None));
            let claimed = match self.entries.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(Slot::Loading {
                        notify: notify.clone(),
                        result: result_slot.clone(),
                    });
                    true
                }
                dashmap::mapref::entry::Entry::Occupied(mut o) => {
                    // Someone raced us; if it's still ready-but-expired, take
                    // over the loading slot ourselves. If another loader beat
                    // us to it, fall through and retry via the Loading arm.
                    match o.get() {
                        Slot::Ready { .. } => {
                            o.insert(Slot::Loading {
                                notify: notify.clone(),
                                result: result_slot.clone(),
                            });
                            true
                        }
                        Slot::Loading { .. } => false,
                    }
                }
            };

            if !claimed {
                continue;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            self.loads.fetch_add(1, Ordering::Relaxed);
            let outcome = loader().await;

            match &outcome {
                Ok(value) => {
                    self.entries.insert(
                        key.clone(),
                        Slot::Ready {
                            value: value.clone(),
                            inserted_at: Instant::now(),
                            ttl,
                            last_used: Instant::now(),
                        },
                    );
                    self.evict_if_over_capacity();
                }
                Err(_) => {
                    // Failures are not cached; remove the loading slot.
                    self.entries.remove(&key);
                }
            }

            *result_slot.lock() = Some(outcome.as_ref().map(|v| v.clone()).map_err(|e| e.to_string()));
            notify.notify_waiters();

            return outcome.map(|v| (v, true));
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len() as u64,
        }
    }

    fn evict_if_over_capacity(&self) {
        if self.max_size == 0 || self.entries.len() <= self.max_size {
            return;
        }
        while self.entries.len() > self.max_size {
            let oldest = self
                .entries
                .iter()
                .filter_map(|e| match e.value() {
                    Slot::Ready { last_used, .. } => Some((e.key().clone(), *last_used)),
                    Slot::Loading { .. } => None,
                })
                .min_by_key(|(_, last_used)| *last_used);
            match oldest {
                Some((key, _)) => {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn miss_then_hit() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let (v, filled) = cache
            .get_or_fill("k", Duration::from_secs(5), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(7)
            })
            .await
            .unwrap();
        assert_eq!(v, 7);
        assert!(filled);

        let c = calls.clone();
        let (v, filled) = cache
            .get_or_fill("k", Duration::from_secs(5), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(99)
            })
            .await
            .unwrap();
        assert_eq!(v, 7, "hit should return the cached value, not reload");
        assert!(!filled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.loads, 1);
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10);
        cache
            .get_or_fill("k", Duration::ZERO, || async { Ok::<_, anyhow::Error>(1) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (v, filled) = cache
            .get_or_fill("k", Duration::ZERO, || async { Ok::<_, anyhow::Error>(2) })
            .await
            .unwrap();
        assert_eq!(v, 1);
        assert!(!filled);
    }

    #[tokio::test]
    async fn expiry_triggers_reload() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10);
        cache
            .get_or_fill("k", Duration::from_millis(5), || async { Ok::<_, anyhow::Error>(1) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (v, filled) = cache
            .get_or_fill("k", Duration::from_millis(5), || async { Ok::<_, anyhow::Error>(2) })
            .await
            .unwrap();
        assert_eq!(v, 2);
        assert!(filled);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10);
        let err = cache
            .get_or_fill("k", Duration::from_secs(5), || async {
                Err::<i32, anyhow::Error>(anyhow::anyhow!("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let (v, filled) = cache
            .get_or_fill("k", Duration::from_secs(5), || async { Ok::<_, anyhow::Error>(5) })
            .await
            .unwrap();
        assert_eq!(v, 5);
        assert!(filled, "a prior failure must not be cached");
    }

    #[tokio::test]
    async fn concurrent_get_or_fill_single_flights() {
        let cache = Arc::new(TtlCache::<&str, i32>::new(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fill("q:600519", Duration::from_secs(5), || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, anyhow::Error>(42)
                        }
                    })
                    .await
                    .unwrap()
                    .0
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 99);
    }

    #[tokio::test]
    async fn lru_eviction_respects_max_size() {
        let cache: TtlCache<i32, i32> = TtlCache::new(2);
        for k in 0..3 {
            cache
                .get_or_fill(k, Duration::from_secs(60), || async move { Ok::<_, anyhow::Error>(k) })
                .await
                .unwrap();
        }
        assert!(cache.stats().size <= 2);
        assert!(cache.stats().evictions >= 1);
    }
}
