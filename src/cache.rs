//! [`TtlCache`]: a keyed, time-bounded store with single-flight fill,
//! explicit invalidation, and lazy background expiration.
//!
//! The single-flight protocol is the one piece of this crate that is worth
//! being paranoid about, so the module-level invariant is repeated here:
//!
//! > While holding an entry's fill-gate, a task must never reacquire that
//! > entry's cache mutex. The cache mutex is always released before the
//! > loader runs.
//!
//! This is enforced structurally: the `MutexGuard` over `entries` never
//! survives past the point where the loader future is awaited.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

/// Background sweep interval, matching the Go original's
/// `EVICT_EXPIRED_AFTER` (3 minutes).
const SWEEP_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Sentinel `expires_at` marking an entry that the sweep must never expire.
///
/// Not currently produced by the dispatcher; reserved for future pinning of
/// hot keys, per the distilled specification.
fn never_expires() -> Instant {
    // `Instant` has no public "infinite" constructor; approximate one by
    // picking a point far enough in the future that no real TTL reaches it.
    Instant::now() + Duration::from_secs(u32::MAX as u64)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum EntryState {
    Filling,
    Ready,
}

struct CacheEntry<V> {
    expires_at: Instant,
    state: EntryState,
    value: Option<V>,
    fill_gate: Arc<Notify>,
}

impl<V> CacheEntry<V> {
    fn filling(expires_at: Instant) -> Self {
        Self { expires_at, state: EntryState::Filling, value: None, fill_gate: Arc::new(Notify::new()) }
    }

    fn ready(expires_at: Instant, value: V) -> Self {
        Self { expires_at, state: EntryState::Ready, value: Some(value), fill_gate: Arc::new(Notify::new()) }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_sweep_at: Instant,
    sweeping: bool,
}

/// A keyed, time-bounded, single-flight cache.
///
/// Cloning a `TtlCache` is cheap and shares the same underlying store (it
/// holds an `Arc` internally); this mirrors the teacher's cache managers,
/// which are themselves `Clone` wrappers around a shared backend.
pub struct TtlCache<V> {
    ttl: Duration,
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self { ttl: self.ttl, inner: Arc::clone(&self.inner) }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new cache with the given time-to-live applied to every
    /// entry produced by `get_or_fill` or `store`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_sweep_at: Instant::now() + SWEEP_INTERVAL,
                sweeping: false,
            })),
        }
    }

    /// Returns the cached value for `key`, invoking `loader` at most once
    /// across all concurrent callers that observe the key as absent or
    /// stale (single flight).
    ///
    /// The cache-wide lock is never held while `loader` runs, so unrelated
    /// keys remain serviceable during a slow fill.
    pub fn get_or_fill<'a, F, Fut>(
        &'a self,
        key: &'a str,
        loader: F,
    ) -> Pin<Box<dyn Future<Output = V> + Send + 'a>>
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = V> + Send + 'a,
    {
        Box::pin(async move {
            let gate_to_fill = {
                let mut guard = self.inner.lock().await;
                let now = Instant::now();

                self.maybe_schedule_sweep(&mut guard, now);

                let needs_fill = match guard.entries.get(key) {
                    Some(entry) => !entry.is_fresh(now),
                    None => true,
                };

                if needs_fill {
                    let entry = CacheEntry::filling(now + self.ttl);
                    let gate = Arc::clone(&entry.fill_gate);
                    guard.entries.insert(key.to_string(), entry);
                    // `guard` is dropped at the end of this block, releasing
                    // the cache-wide lock before the loader runs below.
                    Some(gate)
                } else {
                    None
                }
            };

            if let Some(gate) = gate_to_fill {
                // We are the filler: run the loader with no lock held,
                // publish the result, then wake every waiter on the gate.
                let value = loader().await;
                {
                    let mut guard = self.inner.lock().await;
                    if let Some(entry) = guard.entries.get_mut(key) {
                        entry.value = Some(value.clone());
                        entry.state = EntryState::Ready;
                    }
                }
                gate.notify_waiters();
                return value;
            }

            // An entry exists and was fresh at the time of the check above.
            // Wait for it to become Ready if it is still Filling; loop to
            // re-read state in case we raced with a notification, or with
            // an invalidation that removed the entry entirely (in which
            // case we fall back to the miss path with the same loader,
            // which we still own untouched on this path).
            loop {
                let guard = self.inner.lock().await;
                match guard.entries.get(key) {
                    None => {
                        drop(guard);
                        return self.get_or_fill(key, loader).await;
                    }
                    Some(entry) if entry.state == EntryState::Ready => {
                        let value = entry.value.clone();
                        drop(guard);
                        return value.expect("Ready entries always carry a value");
                    }
                    Some(entry) => {
                        let gate = Arc::clone(&entry.fill_gate);
                        // `notified()` must be constructed while the lock is
                        // still held: it registers the waiter immediately,
                        // and the filler cannot reacquire this same lock to
                        // publish (and subsequently call notify_waiters())
                        // until we release it below. Cloning the gate and
                        // calling `.notified()` only after dropping the
                        // guard would leave a window where notify_waiters()
                        // fires before this future exists, and Notify does
                        // not store a permit for that case — the waiter
                        // would hang forever.
                        let notified = gate.notified();
                        drop(guard);
                        notified.await;
                    }
                }
            }
        })
    }

    /// Removes the entry for `key` if present, returning its prior value.
    ///
    /// Does not interrupt an in-flight fill: a filler that completes after
    /// this call reinserts its result under the same key. This is
    /// documented, intentional behavior — operators re-issue invalidation
    /// if a race is suspected.
    pub async fn invalidate(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().await;
        guard.entries.remove(key).and_then(|entry| entry.value)
    }

    /// Removes every entry whose key satisfies `predicate`. The entire
    /// sweep runs under the cache-wide lock; iteration order is
    /// unspecified.
    pub async fn invalidate_where<P>(&self, mut predicate: P)
    where
        P: FnMut(&str) -> bool,
    {
        let mut guard = self.inner.lock().await;
        guard.entries.retain(|key, _| !predicate(key));
    }

    /// Unconditionally inserts `value` under `key` with a freshly computed
    /// expiry, overwriting any existing entry atomically with respect to
    /// other callers.
    pub async fn store(&self, key: &str, value: V) {
        let mut guard = self.inner.lock().await;
        let expires_at = Instant::now() + self.ttl;
        guard.entries.insert(key.to_string(), CacheEntry::ready(expires_at, value));
    }

    /// Inserts `value` under `key` such that the background sweep will
    /// never expire it. Reserved for future hot-key pinning; not used by
    /// the dispatcher today.
    #[allow(dead_code)]
    pub async fn store_pinned(&self, key: &str, value: V) {
        let mut guard = self.inner.lock().await;
        guard.entries.insert(key.to_string(), CacheEntry::ready(never_expires(), value));
    }

    /// Number of entries currently tracked, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    fn maybe_schedule_sweep(&self, guard: &mut Inner<V>, now: Instant) {
        if guard.next_sweep_at > now || guard.sweeping {
            return;
        }
        guard.sweeping = true;
        guard.next_sweep_at = now + SWEEP_INTERVAL;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut guard = inner.lock().await;
            guard.sweeping = false;
            let now = Instant::now();
            guard.entries.retain(|_, entry| {
                !(entry.state == EntryState::Ready && entry.expires_at <= now)
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify as TestNotify;

    #[tokio::test]
    async fn single_flight_invokes_loader_once() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let start_gate = Arc::new(TestNotify::new());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let start_gate = Arc::clone(&start_gate);
            handles.push(tokio::spawn(async move {
                start_gate.notified().await;
                cache
                    .get_or_fill("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        7u32
                    })
                    .await
            }));
        }

        // Let every task queue up on the notify before releasing them.
        tokio::task::yield_now().await;
        start_gate.notify_waiters();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| *v == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_triggers_second_fill_after_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_fill("k", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    1u32
                }
            })
            .await;
        assert_eq!(first, 1);

        tokio::time::advance(Duration::from_millis(150)).await;

        let second = cache
            .get_or_fill("k", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    2u32
                }
            })
            .await;

        assert_eq!(second, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10));
        cache.store("k", 1).await;
        assert_eq!(cache.invalidate("k").await, Some(1));
        assert_eq!(cache.invalidate("k").await, None);
    }

    #[tokio::test]
    async fn invalidate_where_removes_matching_keys_only() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10));
        cache.store("a/1", 1).await;
        cache.store("a/2", 2).await;
        cache.store("b/1", 3).await;

        cache.invalidate_where(|key| key.starts_with("a/")).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.invalidate("b/1").await, Some(3));
    }

    #[tokio::test]
    async fn no_loader_runs_under_the_lock() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10));
        let blocker = Arc::new(TestNotify::new());

        let cache_for_slow = cache.clone();
        let blocker_clone = Arc::clone(&blocker);
        let slow = tokio::spawn(async move {
            cache_for_slow
                .get_or_fill("slow", || async move {
                    blocker_clone.notified().await;
                    1u32
                })
                .await
        });

        // Give the slow filler a chance to register its entry and release
        // the cache lock before we touch an unrelated key.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fast = tokio::time::timeout(
            Duration::from_millis(200),
            cache.get_or_fill("fast", || async { 2u32 }),
        )
        .await
        .expect("unrelated key must not be blocked by the slow filler");
        assert_eq!(fast, 2);

        blocker.notify_waiters();
        assert_eq!(slow.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_never_removes_a_filling_entry() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(10));
        let blocker = Arc::new(TestNotify::new());
        let blocker_clone = Arc::clone(&blocker);

        let cache_for_fill = cache.clone();
        let filler = tokio::spawn(async move {
            cache_for_fill
                .get_or_fill("k", || async move {
                    blocker_clone.notified().await;
                    1u32
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        // TTL has elapsed but the entry is still Filling; it must survive.
        assert_eq!(cache.len().await, 1);

        blocker.notify_waiters();
        assert_eq!(filler.await.unwrap(), 1);
    }
}
