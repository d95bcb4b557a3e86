use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type SharedFetch<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Freshness window applied when a call does not override it. Long by
    /// default: the cached reference data changes on the order of minutes.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Read-only snapshot of the cache, for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub cached_keys: Vec<String>,
    pub in_flight_keys: Vec<String>,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<T> {
    value: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> Entry<T> {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

struct State<T> {
    entries: HashMap<String, Entry<T>>,
    flight: HashMap<String, SharedFetch<T>>,
    hits: u64,
    misses: u64,
}

/// Single-flight, time-boxed memoization of keyed asynchronous fetches.
///
/// Per key, at any instant, exactly one of: a resolved entry (fresh or
/// stale), or one in-flight computation. Concurrent callers for the same
/// key share the in-flight future instead of starting duplicate fetches;
/// naive refresh-triggered fetching otherwise produces N simultaneous
/// identical requests. Failures are never cached.
pub struct SingleFlightCache<T> {
    cfg: CacheConfig,
    state: Mutex<State<T>>,
}

impl<T> SingleFlightCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                entries: HashMap::new(),
                flight: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Return the fresh cached value for `key`, join the in-flight fetch if
    /// one exists, or invoke `fetch` and register it as the key's single
    /// in-flight computation.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_or_fetch_with_ttl(key, self.cfg.default_ttl, fetch)
            .await
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch) with a per-call
    /// freshness window.
    pub async fn get_or_fetch_with_ttl<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut st = self.state_guard();
            if let Some(value) = st
                .entries
                .get(key)
                .filter(|entry| entry.is_fresh())
                .map(|entry| entry.value.clone())
            {
                st.hits += 1;
                debug!(key, "cache hit");
                return Ok(value);
            }
            if let Some(flight) = st.flight.get(key) {
                debug!(key, "joining in-flight fetch");
                flight.clone()
            } else {
                st.misses += 1;
                // a stale entry and a new computation never coexist
                st.entries.remove(key);
                let fut: SharedFetch<T> = fetch().map(|r| r.map_err(Arc::new)).boxed().shared();
                st.flight.insert(key.to_string(), fut.clone());
                debug!(key, "cache miss, fetch started");
                fut
            }
        };

        let result = shared.clone().await;
        self.settle(key, ttl, &shared, &result);
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(Arc::try_unwrap(err).unwrap_or_else(|shared| shared.duplicate())),
        }
    }

    /// Record the settlement of an in-flight fetch: store the value on
    /// success, drop the in-flight marker either way. Every waiter calls
    /// this; only the first to arrive (for the future still registered
    /// under the key) does the bookkeeping, so a fetch that was invalidated
    /// mid-flight is not written back.
    fn settle(&self, key: &str, ttl: Duration, shared: &SharedFetch<T>, result: &std::result::Result<T, Arc<Error>>) {
        let mut st = self.state_guard();
        let is_current = st
            .flight
            .get(key)
            .map(|f| f.ptr_eq(shared))
            .unwrap_or(false);
        if !is_current {
            return;
        }
        st.flight.remove(key);
        if let Ok(value) = result {
            st.entries.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    stored_at: Instant::now(),
                    ttl,
                },
            );
        }
    }

    /// Synchronously remove the cached entry and any in-flight marker for
    /// `key`. A fetch already running completes for its current waiters but
    /// is not written back.
    pub fn invalidate(&self, key: &str) {
        let mut st = self.state_guard();
        st.entries.remove(key);
        st.flight.remove(key);
        debug!(key, "cache invalidated");
    }

    /// Synchronously drop every cached entry and in-flight marker.
    pub fn invalidate_all(&self) {
        let mut st = self.state_guard();
        st.entries.clear();
        st.flight.clear();
        debug!("cache fully invalidated");
    }

    /// Whether a fresh entry for `key` exists right now.
    pub fn contains_fresh(&self, key: &str) -> bool {
        self.state_guard()
            .entries
            .get(key)
            .map(|e| e.is_fresh())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state_guard();
        CacheStats {
            cached_keys: st.entries.keys().cloned().collect(),
            in_flight_keys: st.flight.keys().cloned().collect(),
            hits: st.hits,
            misses: st.misses,
        }
    }
}
