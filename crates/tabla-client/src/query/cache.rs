//! The query cache proper.
//!
//! ## Guarantees
//!
//! - Concurrent fetches of one key share a single in-flight load.
//! - Every load carries a sequence number. A completion never replaces
//!   data written by a newer load.
//! - [`QueryCache::reset`] starts a new epoch. Loads started before it
//!   never write and never notify.
//! - Entries with a mounted observer are never evicted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use super::retry::{RetryDecision, RetryPolicy};
use super::{LifecycleEvent, QueryKey, QueryState, decode};
use crate::config::CacheConfig;
use crate::error::ApiError;
use crate::session::TokenGuard;

/// Type-erased loader. Called once per attempt.
pub type Loader = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<Value>, ApiError>>>;

/// Wrap a typed async closure as a [`Loader`].
pub fn typed_loader<T, F, Fut>(load: F) -> Loader
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = load();
        async move {
            let data = fut.await?;
            serde_json::to_value(data).map_err(|e| ApiError::decode(e.to_string()))
        }
        .boxed()
    })
}

struct CacheEntry {
    data: Arc<Value>,
    fetched_at: Instant,
    last_accessed: Instant,
    stale: bool,
    sequence: u64,
}

impl CacheEntry {
    fn is_stale(&self, stale_time: std::time::Duration) -> bool {
        self.stale || self.fetched_at.elapsed() >= stale_time
    }

    fn is_idle(&self, gc_time: std::time::Duration) -> bool {
        self.last_accessed.elapsed() >= gc_time
    }
}

struct InFlight {
    sequence: u64,
    detached: Arc<AtomicBool>,
    future: LoadFuture,
}

struct Mounted {
    state: watch::Sender<QueryState>,
    loader: Loader,
    handles: usize,
}

pub(crate) struct CacheInner {
    config: CacheConfig,
    retry: RetryPolicy,
    guard: Option<Arc<dyn TokenGuard>>,
    entries: DashMap<QueryKey, CacheEntry>,
    in_flight: DashMap<QueryKey, InFlight>,
    mounted: DashMap<QueryKey, Mounted>,
    sequence: AtomicU64,
    epoch: AtomicU64,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl CacheInner {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn publish(&self, key: &QueryKey, state: QueryState) {
        if let Some(mounted) = self.mounted.get(key) {
            mounted.state.send_replace(state);
        }
    }

    /// Store `data` unless a newer load already wrote this key.
    fn write(&self, key: &QueryKey, data: Arc<Value>, sequence: u64, stale: bool) -> bool {
        let now = Instant::now();
        let entry = CacheEntry {
            data,
            fetched_at: now,
            last_accessed: now,
            stale,
            sequence,
        };
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().sequence > sequence {
                    tracing::debug!(
                        key = %key,
                        sequence,
                        stored = existing.get().sequence,
                        "Discarding out-of-order load result"
                    );
                    return false;
                }
                existing.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        true
    }

    fn has_newer(&self, key: &QueryKey, sequence: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.sequence > sequence)
    }

    fn complete(&self, task: &LoadTask, result: &Result<Arc<Value>, ApiError>) {
        self.in_flight
            .remove_if(&task.key, |_, f| f.sequence == task.sequence);

        if self.current_epoch() != task.epoch {
            tracing::debug!(key = %task.key, "Discarding load from a previous cache epoch");
            return;
        }

        match result {
            Ok(data) => {
                let stale = task.detached.load(Ordering::SeqCst);
                if self.write(&task.key, data.clone(), task.sequence, stale) {
                    self.publish(&task.key, QueryState::Success(data.clone()));
                }
            }
            Err(err) => {
                if !self.has_newer(&task.key, task.sequence) {
                    self.publish(&task.key, QueryState::Error(err.clone()));
                }
            }
        }
    }
}

struct LoadTask {
    key: QueryKey,
    sequence: u64,
    epoch: u64,
    detached: Arc<AtomicBool>,
}

impl LoadTask {
    /// Run the loader under the retry policy and record the outcome.
    ///
    /// Holds the cache weakly: a load outliving the cache just returns.
    async fn run(
        self,
        cache: Weak<CacheInner>,
        loader: Loader,
        retry: RetryPolicy,
        guard: Option<Arc<dyn TokenGuard>>,
    ) -> Result<Arc<Value>, ApiError> {
        if let Some(inner) = cache.upgrade()
            && inner.current_epoch() == self.epoch
            && let Some(mounted) = inner.mounted.get(&self.key)
        {
            mounted.state.send_if_modified(|state| {
                if matches!(state, QueryState::Success(_)) {
                    false
                } else {
                    *state = QueryState::Loading;
                    true
                }
            });
        }

        let result = load_with_retry(&self.key, &loader, &retry, guard.as_deref())
            .await
            .map(Arc::new);

        if let Some(inner) = cache.upgrade() {
            inner.complete(&self, &result);
        }
        result
    }
}

async fn load_with_retry(
    key: &QueryKey,
    loader: &Loader,
    retry: &RetryPolicy,
    guard: Option<&dyn TokenGuard>,
) -> Result<Value, ApiError> {
    let mut retries = 0;
    let mut auth_retried = false;

    loop {
        let err = match loader().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match retry.decide(&err, retries, auth_retried) {
            RetryDecision::Backoff(delay) => {
                retries += 1;
                tracing::warn!(
                    key = %key,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Query load failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::RefreshAndRetry => {
                auth_retried = true;
                let Some(guard) = guard else {
                    return Err(err);
                };
                if !guard.ensure_valid_token().await {
                    return Err(err);
                }
                tracing::debug!(key = %key, "Retrying query after token check");
            }
            RetryDecision::GiveUp => return Err(err),
        }
    }
}

/// Shared query cache. Clones share one cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    /// `guard` is consulted before the single retry of a 401 response.
    pub fn new(config: CacheConfig, guard: Option<Arc<dyn TokenGuard>>) -> Self {
        let (lifecycle, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(CacheInner {
                retry: RetryPolicy::from_config(&config),
                config,
                guard,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                mounted: DashMap::new(),
                sequence: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                lifecycle,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(super) fn downgrade(&self) -> Weak<CacheInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(inner: &Weak<CacheInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Typed fetch: fresh cached data, or the result of `load`.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, load: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let value = self.fetch_value(key, typed_loader(load)).await?;
        decode(&value)
    }

    /// Return fresh cached data for `key`, otherwise load it.
    pub async fn fetch_value(&self, key: &QueryKey, loader: Loader) -> Result<Arc<Value>, ApiError> {
        if let Some(data) = self.fresh(key) {
            tracing::trace!(key = %key, "Query cache hit");
            return Ok(data);
        }
        self.load(key, loader).await
    }

    /// Load `key` even when cached data is fresh. Joins a load that is
    /// already in flight.
    pub async fn refetch_value(
        &self,
        key: &QueryKey,
        loader: Loader,
    ) -> Result<Arc<Value>, ApiError> {
        self.load(key, loader).await
    }

    fn fresh(&self, key: &QueryKey) -> Option<Arc<Value>> {
        let mounted = self.inner.mounted.contains_key(key);
        let mut evict = false;
        if let Some(mut entry) = self.inner.entries.get_mut(key) {
            if !mounted && entry.is_idle(self.inner.config.gc_time) {
                evict = true;
            } else {
                entry.last_accessed = Instant::now();
                if !entry.is_stale(self.inner.config.stale_time) {
                    return Some(entry.data.clone());
                }
            }
        }
        if evict {
            self.inner.entries.remove(key);
            tracing::debug!(key = %key, "Evicted idle query on access");
        }
        None
    }

    fn load(&self, key: &QueryKey, loader: Loader) -> LoadFuture {
        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::trace!(key = %key, "Joining in-flight load");
                existing.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let sequence = self.inner.next_sequence();
                let detached = Arc::new(AtomicBool::new(false));
                let task = LoadTask {
                    key: key.clone(),
                    sequence,
                    epoch: self.inner.current_epoch(),
                    detached: detached.clone(),
                };
                tracing::debug!(key = %key, sequence, "Loading query");
                let future = task
                    .run(
                        self.downgrade(),
                        loader,
                        self.inner.retry.clone(),
                        self.inner.guard.clone(),
                    )
                    .boxed()
                    .shared();
                slot.insert(InFlight {
                    sequence,
                    detached,
                    future: future.clone(),
                });
                future
            }
        }
    }

    /// Cached data regardless of staleness.
    pub fn get_value(&self, key: &QueryKey) -> Option<Arc<Value>> {
        self.inner.entries.get_mut(key).map(|mut entry| {
            entry.last_accessed = Instant::now();
            entry.data.clone()
        })
    }

    pub fn get_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>, ApiError> {
        self.get_value(key).map(|v| decode(&v)).transpose()
    }

    /// Write data directly. Counts as a fresh load and notifies observers.
    pub fn set_data<T: Serialize>(&self, key: &QueryKey, data: &T) -> Result<(), ApiError> {
        let value = serde_json::to_value(data).map_err(|e| ApiError::decode(e.to_string()))?;
        let data = Arc::new(value);
        let sequence = self.inner.next_sequence();
        if self.inner.write(key, data.clone(), sequence, false) {
            self.inner.publish(key, QueryState::Success(data));
        }
        Ok(())
    }

    /// Whether `key` would reload on the next fetch.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.inner
            .entries
            .get(key)
            .is_none_or(|entry| entry.is_stale(self.inner.config.stale_time))
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Mark every entry under `pattern` stale and detach its in-flight
    /// loads. Mounted queries under `pattern` are refetched in the
    /// background. Returns the number of entries marked.
    pub fn invalidate(&self, pattern: &QueryKey) -> usize {
        let mut marked = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry.key().starts_with(pattern) {
                entry.stale = true;
                marked += 1;
            }
        }
        self.inner.in_flight.retain(|key, load| {
            if key.starts_with(pattern) {
                load.detached.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        tracing::debug!(pattern = %pattern, entries = marked, "Invalidated queries");

        let observed = self.mounted_loaders(|key| key.starts_with(pattern));
        if !observed.is_empty() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let cache = self.clone();
                    handle.spawn(async move {
                        cache.refetch_all(observed).await;
                    });
                }
                Err(_) => {
                    tracing::debug!(pattern = %pattern, "No runtime, mounted queries refetch on next access");
                }
            }
        }
        marked
    }

    /// Drop all data and start a new epoch.
    pub fn reset(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.entries.clear();
        self.inner.in_flight.retain(|_, load| {
            load.detached.store(true, Ordering::SeqCst);
            false
        });
        for mounted in self.inner.mounted.iter() {
            mounted.state.send_replace(QueryState::Idle);
        }
        tracing::info!(epoch, "Query cache reset");
    }

    /// Evict entries idle for longer than the GC window. Returns the
    /// number removed.
    pub fn gc(&self) -> usize {
        let gc_time = self.inner.config.gc_time;
        let before = self.inner.entries.len();
        let mounted = &self.inner.mounted;
        self.inner
            .entries
            .retain(|key, entry| mounted.contains_key(key) || !entry.is_idle(gc_time));
        let removed = before.saturating_sub(self.inner.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Query cache GC sweep");
        }
        removed
    }

    /// Observe `key`. The returned handle carries the query's state stream
    /// and keeps the entry from being evicted. Missing or stale data is
    /// loaded in the background.
    pub fn mount(&self, key: QueryKey, loader: Loader) -> QueryHandle {
        let initial = self
            .inner
            .entries
            .get(&key)
            .map(|entry| QueryState::Success(entry.data.clone()))
            .unwrap_or_default();

        let receiver = match self.inner.mounted.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                let mounted = existing.get_mut();
                mounted.handles += 1;
                mounted.loader = loader.clone();
                mounted.state.subscribe()
            }
            Entry::Vacant(slot) => {
                let (state, receiver) = watch::channel(initial);
                slot.insert(Mounted {
                    state,
                    loader: loader.clone(),
                    handles: 1,
                });
                receiver
            }
        };

        if self.is_stale(&key) {
            let cache = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.fetch_value(&key, loader).await {
                    tracing::debug!(key = %key, error = %e, "Initial load of mounted query failed");
                }
            });
        }

        QueryHandle {
            key,
            cache: self.clone(),
            receiver,
        }
    }

    fn unmount(&self, key: &QueryKey) {
        let last = match self.inner.mounted.get_mut(key) {
            Some(mut mounted) => {
                mounted.handles = mounted.handles.saturating_sub(1);
                mounted.handles == 0
            }
            None => false,
        };
        if last {
            self.inner.mounted.remove_if(key, |_, m| m.handles == 0);
            // The GC window starts when the last observer leaves.
            if let Some(mut entry) = self.inner.entries.get_mut(key) {
                entry.last_accessed = Instant::now();
            }
        }
    }

    pub fn is_mounted(&self, key: &QueryKey) -> bool {
        self.inner.mounted.contains_key(key)
    }

    fn mounted_loaders(&self, filter: impl Fn(&QueryKey) -> bool) -> Vec<(QueryKey, Loader)> {
        self.inner
            .mounted
            .iter()
            .filter(|m| filter(m.key()))
            .map(|m| (m.key().clone(), m.loader.clone()))
            .collect()
    }

    async fn refetch_all(&self, queries: Vec<(QueryKey, Loader)>) -> usize {
        let count = queries.len();
        let loads = queries
            .into_iter()
            .map(|(key, loader)| async move {
                if let Err(e) = self.load(&key, loader).await {
                    tracing::debug!(key = %key, error = %e, "Background refetch failed");
                }
            });
        future::join_all(loads).await;
        count
    }

    /// Refetch mounted queries: all of them, or only the stale ones.
    /// Returns how many were refetched.
    pub async fn refetch_mounted(&self, only_stale: bool) -> usize {
        let queries = self.mounted_loaders(|key| !only_stale || self.is_stale(key));
        self.refetch_all(queries).await
    }

    /// Deliver a lifecycle signal to the auto-refresh task, if one runs.
    pub fn notify(&self, event: LifecycleEvent) {
        if self.inner.lifecycle.send(event).is_err() {
            tracing::trace!(?event, "No auto-refresh listener for lifecycle event");
        }
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }
}

/// Observer of one mounted query. Dropping it unmounts the query.
pub struct QueryHandle {
    key: QueryKey,
    cache: QueryCache,
    receiver: watch::Receiver<QueryState>,
}

impl QueryHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState {
        self.receiver.borrow().clone()
    }

    /// Wait for the next state change. `None` once the query was dropped
    /// from the cache.
    pub async fn changed(&mut self) -> Option<QueryState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&QueryState) -> bool) -> Option<QueryState> {
        self.receiver
            .wait_for(predicate)
            .await
            .ok()
            .map(|state| state.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.receiver.clone()
    }

    /// Force a reload with the mounted loader.
    pub async fn refetch(&self) -> Result<Arc<Value>, ApiError> {
        let loader = self
            .cache
            .inner
            .mounted
            .get(&self.key)
            .map(|m| m.loader.clone());
        match loader {
            Some(loader) => self.cache.load(&self.key, loader).await,
            None => Err(ApiError::decode(format!("query '{}' is not mounted", self.key))),
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.cache.unmount(&self.key);
    }
}
