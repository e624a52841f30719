//! A concurrent map with per-entry expiration and an optional miss resolver.
//! Lookups never fail: an unknown or expired key is a miss, and a configured
//! resolver gets one chance to produce the value from an external source.

use std::hash::Hash;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{self, Instant, MissedTickBehavior};

/// The sweeper never scans more often than this.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Expiration policy for a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Expire after the cache-wide default TTL.
    Default,
    /// Keep the entry until it is deleted or replaced.
    Never,
    /// Expire after the given duration.
    After(Duration),
}

/// A resolver is consulted when a lookup misses, typically to fetch the
/// value from an external store. A resolver that wants future lookups to hit
/// the map must seed the cache itself; whatever it returns is handed back to
/// the caller as the result of the lookup.
#[async_trait]
pub trait Resolve<K, V>: Send + Sync {
    /// Produce a value for `key`, or `None` if the key is unknown there too.
    async fn resolve(&self, key: &K) -> Option<V>;
}

struct Entry<V> {
    value: V,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => now >= at,
            None => false,
        }
    }
}

/// A concurrent TTL map. Reads and writes are safe from any task or thread;
/// readers do not block each other. Expired entries are treated as misses on
/// read and physically removed by a background sweeper task.
pub struct TtlCache<K, V> {
    items: DashMap<K, Entry<V>>,
    default_ttl: Option<Duration>,
    resolver: OnceLock<Box<dyn Resolve<K, V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache whose entries expire after `default_ttl` unless an
    /// insert overrides it; `None` means entries do not expire by default.
    ///
    /// Must be called from within a tokio runtime: the cache owns a sweeper
    /// task that wakes every `max(default_ttl / 2, 1s)` and deletes expired
    /// entries. The sweeper stops once the last handle to the cache is gone.
    pub fn new(default_ttl: Option<Duration>) -> Arc<Self> {
        let cache = Arc::new(Self {
            items: DashMap::new(),
            default_ttl,
            resolver: OnceLock::new(),
        });
        Self::spawn_sweeper(Arc::downgrade(&cache), sweep_interval(default_ttl));
        cache
    }

    /// Look up `key`. An expired entry counts as a miss. On a miss the
    /// installed resolver, if any, is consulted and its answer is the result
    /// of the lookup.
    pub async fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.items.get(key) {
            if !entry.is_expired(Instant::now()) {
                return Some(entry.value.clone());
            }
        }
        // No shard guard is held past this point, so a resolver writing back
        // through `set` cannot re-enter a locked shard.
        self.resolver.get()?.resolve(key).await
    }

    /// Return the current value for `key` and reset its expiration. The
    /// previous value is handed back even though its expiration is replaced.
    pub async fn get_and_refresh(&self, key: &K, ttl: Ttl) -> Option<V>
    where
        K: Clone,
    {
        let value = self.get(key).await?;
        self.set_with_ttl(key.clone(), value.clone(), ttl);
        Some(value)
    }

    /// Insert `value` at the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, Ttl::Default);
    }

    /// Insert `value` with an explicit expiration policy.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Ttl) {
        let expires_at = self.expiry(ttl, Instant::now());
        self.items.insert(key, Entry { value, expires_at });
    }

    /// Remove `key` if present.
    pub fn delete(&self, key: &K) {
        self.items.remove(key);
    }

    /// Install the miss resolver. Only the first call takes effect; returns
    /// whether this call installed its resolver.
    pub fn set_resolver<R>(&self, resolver: R) -> bool
    where
        R: Resolve<K, V> + 'static,
    {
        self.resolver.set(Box::new(resolver)).is_ok()
    }

    /// Number of stored entries, counting expired ones the sweeper has not
    /// visited yet.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn expiry(&self, ttl: Ttl, now: Instant) -> Option<Instant> {
        match ttl {
            Ttl::Default => self.default_ttl.map(|d| now + d),
            Ttl::Never => None,
            Ttl::After(d) => Some(now + d),
        }
    }

    fn spawn_sweeper(cache: Weak<Self>, every: Duration) {
        tokio::spawn(async move {
            let mut tick = time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match cache.upgrade() {
                    Some(cache) => cache.sweep(Instant::now()),
                    None => break,
                }
            }
        });
    }

    fn sweep(&self, now: Instant) {
        self.items.retain(|_, entry| !entry.is_expired(now));
    }
}

fn sweep_interval(default_ttl: Option<Duration>) -> Duration {
    match default_ttl {
        Some(ttl) => std::cmp::max(ttl / 2, MIN_SWEEP_INTERVAL),
        None => MIN_SWEEP_INTERVAL,
    }
}
