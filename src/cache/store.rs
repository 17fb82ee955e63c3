//! TTL cache with single-flight computation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_HIT_TOTAL: &str = "classlist_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "classlist_cache_miss_total";
const METRIC_COALESCED_TOTAL: &str = "classlist_cache_coalesced_total";
const METRIC_EVICT_TOTAL: &str = "classlist_cache_evict_total";
const METRIC_EXPIRED_TOTAL: &str = "classlist_cache_expired_total";
const METRIC_COMPUTE_MS: &str = "classlist_report_compute_ms";

/// Why a caller received no value.
#[derive(Debug, Error)]
pub enum FlightError<E> {
    /// The shared computation failed; every waiter holds the same error.
    #[error("cached computation failed: {0}")]
    Compute(Arc<E>),
    /// The computation stopped (panicked) before publishing anything.
    #[error("cached computation was abandoned")]
    Abandoned,
}

impl<E> Clone for FlightError<E> {
    fn clone(&self) -> Self {
        match self {
            FlightError::Compute(error) => FlightError::Compute(Arc::clone(error)),
            FlightError::Abandoned => FlightError::Abandoned,
        }
    }
}

type Outcome<V, E> = Option<Result<Arc<V>, Arc<E>>>;

struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: Instant,
}

struct Flight<V, E> {
    id: u64,
    receiver: watch::Receiver<Outcome<V, E>>,
}

struct Inner<K, V, E> {
    entries: LruCache<K, CacheEntry<V>>,
    pending: HashMap<K, Flight<V, E>>,
    next_flight: u64,
}

impl<K: Eq + Hash, V, E> Inner<K, V, E> {
    /// Remove the pending flight for `key` only if it is still flight `id`.
    fn finish_flight(&mut self, key: &K, id: u64) -> bool {
        if self.pending.get(key).is_some_and(|flight| flight.id == id) {
            self.pending.remove(key);
            true
        } else {
            false
        }
    }
}

enum Lookup<V, E> {
    Hit(Arc<V>),
    Join(watch::Receiver<Outcome<V, E>>),
    Lead {
        id: u64,
        sender: watch::Sender<Outcome<V, E>>,
        receiver: watch::Receiver<Outcome<V, E>>,
    },
}

/// Keyed cache whose misses are computed once, however many callers race.
///
/// The computation runs on its own task, so a caller that stops waiting never
/// cancels it; the result still lands in the cache for the next caller.
pub struct TtlCache<K, V, E> {
    name: &'static str,
    ttl: Duration,
    inner: Arc<Mutex<Inner<K, V, E>>>,
}

impl<K, V, E> Clone for TtlCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            ttl: self.ttl,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> fmt::Debug for TtlCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        Self {
            name,
            ttl: config.ttl,
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(config.max_entries_non_zero()),
                pending: HashMap::new(),
                next_flight: 0,
            })),
        }
    }

    /// Return the fresh value for `key`, computing it at most once across
    /// concurrent callers.
    ///
    /// Only successful results are stored. An error is delivered to every
    /// caller waiting on that computation and the next request starts over.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<Arc<V>, FlightError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let lookup = self.lookup(&key);
        let receiver = match lookup {
            Lookup::Hit(value) => {
                counter!(METRIC_HIT_TOTAL, "cache" => self.name).increment(1);
                return Ok(value);
            }
            Lookup::Join(receiver) => {
                counter!(METRIC_COALESCED_TOTAL, "cache" => self.name).increment(1);
                debug!(cache = self.name, "joining in-flight computation");
                receiver
            }
            Lookup::Lead {
                id,
                sender,
                receiver,
            } => {
                counter!(METRIC_MISS_TOTAL, "cache" => self.name).increment(1);
                self.spawn_flight(key, id, sender, compute());
                receiver
            }
        };

        wait_for_outcome(receiver).await
    }

    /// Fresh value for `key`, if stored. Never computes.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "get");
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(Arc::clone(&entry.value)),
            _ => None,
        }
    }

    /// Drop `key`. A computation already running for it still answers its
    /// waiters but its result is not stored.
    pub fn invalidate(&self, key: &K) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "invalidate");
        inner.entries.pop(key);
        inner.pending.remove(key);
    }

    /// Drop every entry and detach every running computation.
    pub fn invalidate_all(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "invalidate_all");
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.pending.clear();
        debug!(cache = self.name, dropped, "cache invalidated");
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = mutex_lock(&self.inner, SOURCE, "sweep_expired");
        let now = Instant::now();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_EXPIRED_TOTAL, "cache" => self.name).increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Stored entries, fresh or not yet swept.
    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computations currently running.
    pub fn in_flight(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "in_flight").pending.len()
    }

    fn lookup(&self, key: &K) -> Lookup<V, E> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "lookup");
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Lookup::Hit(Arc::clone(&entry.value)),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.pop(key);
            counter!(METRIC_EXPIRED_TOTAL, "cache" => self.name).increment(1);
        }

        if let Some(flight) = inner.pending.get(key) {
            return Lookup::Join(flight.receiver.clone());
        }

        let id = inner.next_flight;
        inner.next_flight = inner.next_flight.wrapping_add(1);
        let (sender, receiver) = watch::channel(None);
        inner.pending.insert(
            key.clone(),
            Flight {
                id,
                receiver: receiver.clone(),
            },
        );
        Lookup::Lead {
            id,
            sender,
            receiver,
        }
    }

    fn spawn_flight<Fut>(&self, key: K, id: u64, sender: watch::Sender<Outcome<V, E>>, future: Fut)
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let name = self.name;
        let ttl = self.ttl;

        tokio::spawn(async move {
            let mut guard = FlightGuard {
                inner: Arc::clone(&inner),
                key: Some(key),
                id,
                name,
            };
            let started = Instant::now();
            let outcome = match future.await {
                Ok(value) => Ok(Arc::new(value)),
                Err(error) => Err(Arc::new(error)),
            };
            histogram!(METRIC_COMPUTE_MS, "cache" => name)
                .record(started.elapsed().as_secs_f64() * 1000.0);

            let Some(key) = guard.key.take() else {
                return;
            };
            let mut state = mutex_lock(&inner, SOURCE, "publish");
            let current = state.finish_flight(&key, id);
            match &outcome {
                Ok(value) if current => {
                    let entry = CacheEntry {
                        value: Arc::clone(value),
                        expires_at: Instant::now() + ttl,
                    };
                    if let Some((evicted, _)) = state.entries.push(key.clone(), entry)
                        && evicted != key
                    {
                        counter!(METRIC_EVICT_TOTAL, "cache" => name).increment(1);
                    }
                }
                Ok(_) => {
                    debug!(cache = name, "discarding result of invalidated computation");
                }
                Err(_) => {
                    debug!(cache = name, "computation failed; nothing stored");
                }
            }
            sender.send_replace(Some(outcome));
        });
    }
}

/// Clears the pending slot if the computation unwinds before publishing.
struct FlightGuard<K: Eq + Hash, V, E> {
    inner: Arc<Mutex<Inner<K, V, E>>>,
    key: Option<K>,
    id: u64,
    name: &'static str,
}

impl<K: Eq + Hash, V, E> Drop for FlightGuard<K, V, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut inner = mutex_lock(&self.inner, SOURCE, "abandon");
            inner.finish_flight(&key, self.id);
            warn!(cache = self.name, "cached computation ended without a result");
        }
    }
}

async fn wait_for_outcome<V, E>(
    mut receiver: watch::Receiver<Outcome<V, E>>,
) -> Result<Arc<V>, FlightError<E>> {
    let outcome = match receiver.wait_for(Option::is_some).await {
        Ok(published) => published.clone(),
        Err(_) => None,
    };
    match outcome {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err(FlightError::Compute(error)),
        None => Err(FlightError::Abandoned),
    }
}
