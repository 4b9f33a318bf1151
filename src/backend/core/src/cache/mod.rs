//! TTL cache with LRU eviction for memoized translation results.
//!
//! - **Expiry**: every entry carries an absolute expiry; expired entries are
//!   treated as absent and removed the moment a read observes them
//! - **Capacity**: inserts beyond `max_size` trigger a sweep and
//!   least-recently-accessed eviction; an optional memory limit evicts by size
//! - **Compression**: large values can be stored gzip-compressed
//! - **Persistence**: the full entry set is snapshotted to a JSON file after
//!   every mutation and rehydrated on construction
//!
//! # Usage
//!
//! ```rust,ignore
//! use transflow_core::cache::{CacheConfig, CacheStore};
//!
//! let cache = CacheStore::<serde_json::Value>::new(
//!     CacheConfig::builder().ttl_seconds(600).max_size(2).build(),
//! )
//! .await?;
//!
//! cache.set("greeting", serde_json::json!("hola"))?;
//! assert_eq!(cache.get("greeting"), Some(serde_json::json!("hola")));
//!
//! cache.shutdown().await;
//! ```

pub mod compression;
pub mod entry;
pub mod key;

pub use entry::{CacheEntry, CacheStats, StoredValue};
pub use key::{content_hash, CacheKey, KeyType};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorCode, Result, TransflowError};
use crate::snapshot::SnapshotFile;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default time-to-live for entries
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Entry count that triggers eviction on insert
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Background cleanup cadence; 0 disables the timer
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    #[serde(default)]
    pub enable_persistence: bool,

    #[serde(default = "default_persistence_path")]
    pub persistence_path: String,

    #[serde(default)]
    pub enable_compression: bool,

    /// Serialized size above which values are compressed
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    #[serde(default)]
    pub enable_memory_limit: bool,

    #[serde(default = "default_max_memory_usage_bytes")]
    pub max_memory_usage_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_size: default_max_size(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            enable_persistence: false,
            persistence_path: default_persistence_path(),
            enable_compression: false,
            compression_threshold_bytes: default_compression_threshold_bytes(),
            enable_memory_limit: false,
            max_memory_usage_bytes: default_max_memory_usage_bytes(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Default entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Check the configuration for values the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(TransflowError::new(
                ErrorCode::InvalidConfiguration,
                "cache.max_size must be greater than zero",
            ));
        }
        if self.enable_persistence && self.persistence_path.trim().is_empty() {
            return Err(TransflowError::new(
                ErrorCode::InvalidConfiguration,
                "cache.persistence_path is required when persistence is enabled",
            ));
        }
        Ok(())
    }
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_size() -> usize {
    1000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_persistence_path() -> String {
    "data/cache.json".to_string()
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_max_memory_usage_bytes() -> u64 {
    100 * 1024 * 1024
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn ttl_seconds(mut self, seconds: u64) -> Self {
        self.config.ttl_seconds = seconds;
        self
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    pub fn cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.cleanup_interval_ms = interval_ms;
        self
    }

    /// Enable snapshot persistence to `path`.
    pub fn persistence(mut self, path: impl Into<String>) -> Self {
        self.config.enable_persistence = true;
        self.config.persistence_path = path.into();
        self
    }

    /// Enable gzip compression for values larger than `threshold_bytes`.
    pub fn compression(mut self, threshold_bytes: usize) -> Self {
        self.config.enable_compression = true;
        self.config.compression_threshold_bytes = threshold_bytes;
        self
    }

    /// Cap the total stored size.
    pub fn memory_limit(mut self, max_bytes: u64) -> Self {
        self.config.enable_memory_limit = true;
        self.config.max_memory_usage_bytes = max_bytes;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Observer
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives cache read outcomes.
///
/// Called after the store has released its lock, so implementations may call
/// back into the cache.
pub trait CacheObserver: Send + Sync {
    fn on_access(&self, hit: bool);
}

/// Values the store can hold.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// ═══════════════════════════════════════════════════════════════════════════════
// Store State
// ═══════════════════════════════════════════════════════════════════════════════

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    total_size_bytes: u64,
    tick: u64,
    /// Entries excluded from `max_size` and LRU eviction
    pinned: usize,
}

impl<V> CacheState<V> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            total_size_bytes: 0,
            tick: 0,
            pinned: 0,
        }
    }

    /// Entries that count toward `max_size`.
    fn user_len(&self) -> usize {
        self.entries.len() - self.pinned
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, key: String, entry: CacheEntry<V>) {
        self.total_size_bytes += entry.size_bytes;
        if entry.pinned {
            self.pinned += 1;
        }
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
            if old.pinned {
                self.pinned -= 1;
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
        if entry.pinned {
            self.pinned -= 1;
        }
        Some(entry)
    }

    fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Unpinned keys from least to most recently accessed.
    fn lru_order(&self, keep: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, entry)| !entry.pinned && Some(key.as_str()) != keep)
            .map(|(key, entry)| (entry.recency(), key))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, key)| key.clone()).collect()
    }

    fn evict_over_capacity(&mut self, max_size: usize) -> usize {
        if self.user_len() <= max_size {
            return 0;
        }

        let excess = self.user_len() - max_size;
        for key in self.lru_order(None).into_iter().take(excess) {
            debug!(key = %key, "Evicting least recently used entry");
            self.remove(&key);
        }
        self.evictions += excess as u64;
        excess
    }

    /// Evict until `incoming` more bytes fit under `limit`. `keep` is never
    /// evicted and its current size is not counted.
    fn evict_for_memory(&mut self, limit: u64, incoming: u64, keep: Option<&str>) -> usize {
        let kept = keep
            .and_then(|key| self.entries.get(key))
            .map(|entry| entry.size_bytes)
            .unwrap_or(0);
        let fits = |state: &Self| state.total_size_bytes - kept + incoming <= limit;

        if fits(&*self) {
            return 0;
        }

        let mut evicted = 0;
        for key in self.lru_order(keep) {
            if fits(&*self) {
                break;
            }
            debug!(key = %key, "Evicting entry to respect memory limit");
            self.remove(&key);
            evicted += 1;
        }
        self.evictions += evicted as u64;
        evicted
    }

    fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            item_count: self.entries.len() as u64,
            hits: self.hits,
            misses: self.misses,
            total_size_bytes: self.total_size_bytes,
            hit_rate: 0.0,
            evictions: self.evictions,
        };
        stats.calculate_hit_rate();
        stats
    }
}

enum Lookup {
    Missing,
    Expired,
    Live,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory TTL cache.
///
/// All operations on one store are serialized through a single lock, so reads
/// and writes to the same key are linearizable.
pub struct CacheStore<V = serde_json::Value> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    snapshot: Option<SnapshotFile>,
    observer: RwLock<Option<Weak<dyn CacheObserver>>>,
    cancel: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<V: CacheValue> CacheStore<V> {
    /// Create a store, rehydrating from the snapshot file when persistence is
    /// enabled and starting the cleanup timer when an interval is set.
    pub async fn new(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let snapshot = config
            .enable_persistence
            .then(|| SnapshotFile::new("cache", &config.persistence_path));

        let mut state = CacheState::empty();
        if let Some(file) = &snapshot {
            if let Some(entries) = file.load::<Vec<(String, CacheEntry<V>)>>().await {
                let now = Utc::now();
                for (key, entry) in entries {
                    if entry.is_expired_at(now) {
                        continue;
                    }
                    state.tick = state.tick.max(entry.access_tick);
                    state.insert(key, entry);
                }
                info!(
                    entries = state.entries.len(),
                    path = %file.path().display(),
                    "Cache restored from snapshot"
                );
            }
        }

        let store = Arc::new(Self {
            config,
            state: Mutex::new(state),
            snapshot,
            observer: RwLock::new(None),
            cancel: CancellationToken::new(),
            cleanup_task: Mutex::new(None),
        });
        store.record_gauges();

        if store.config.cleanup_interval_ms > 0 {
            let handle = spawn_cleanup_timer(
                Arc::downgrade(&store),
                store.cancel.clone(),
                Duration::from_millis(store.config.cleanup_interval_ms),
            );
            *store.cleanup_task.lock() = Some(handle);
        }

        Ok(store)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Attach an observer for hit/miss events. Replaces any previous one.
    pub fn attach_observer(&self, observer: Weak<dyn CacheObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Get a value. Expired entries are removed and reported as a miss.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Utc::now();

        let value = {
            let mut state = self.state.lock();
            let lookup = match state.entries.get(key) {
                None => Lookup::Missing,
                Some(entry) if entry.is_expired_at(now) => Lookup::Expired,
                Some(_) => Lookup::Live,
            };

            match lookup {
                Lookup::Missing => {
                    state.misses += 1;
                    counter!("transflow_cache_misses_total", "reason" => "not_found").increment(1);
                    None
                }
                Lookup::Expired => {
                    state.remove(key);
                    state.misses += 1;
                    counter!("transflow_cache_misses_total", "reason" => "expired").increment(1);
                    debug!("Cache entry expired");
                    self.persist_locked(&state);
                    None
                }
                Lookup::Live => {
                    let tick = state.next_tick();
                    let decoded = match state.entries.get_mut(key) {
                        Some(entry) => {
                            entry.touch(now, tick);
                            Some(decode(&entry.value))
                        }
                        None => None,
                    };

                    match decoded {
                        Some(Ok(value)) => {
                            state.hits += 1;
                            counter!("transflow_cache_hits_total").increment(1);
                            Some(value)
                        }
                        Some(Err(e)) => {
                            e.log();
                            state.remove(key);
                            state.misses += 1;
                            counter!("transflow_cache_misses_total", "reason" => "corrupt")
                                .increment(1);
                            self.persist_locked(&state);
                            None
                        }
                        None => None,
                    }
                }
            }
        };

        self.notify(value.is_some());
        value
    }

    /// Insert or overwrite a value with the configured TTL.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.set_with_ttl(key, value, self.config.ttl())
    }

    /// Insert or overwrite a value with a custom TTL.
    #[instrument(skip(self, key, value), fields(key = tracing::field::Empty, ttl_secs = ttl.as_secs()))]
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<()> {
        let key = key.into();
        tracing::Span::current().record("key", key.as_str());
        self.store(key, value, ttl, false)
    }

    /// Store an internal entry. Pinned entries expire like any other but
    /// neither count toward `max_size` nor take part in eviction, and
    /// writing one never triggers a cleanup pass.
    pub(crate) fn set_pinned(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.store(key.into(), value, self.config.ttl(), true)
    }

    /// Read a value without touching access metadata or hit/miss counters.
    pub(crate) fn peek(&self, key: &str) -> Option<Result<V>> {
        let now = Utc::now();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| decode(&entry.value))
    }

    fn store(&self, key: String, value: V, ttl: Duration, pinned: bool) -> Result<()> {
        let (stored, size_bytes) = self.encode(value)?;
        let ttl = chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let now = Utc::now();

        {
            let mut state = self.state.lock();
            if !pinned {
                if state.user_len() >= self.config.max_size {
                    self.cleanup_locked(&mut state, now);
                }
                if self.config.enable_memory_limit {
                    state.evict_for_memory(self.config.max_memory_usage_bytes, size_bytes, Some(&key));
                }
            }

            let tick = state.next_tick();
            let mut entry = CacheEntry::new(stored, size_bytes, now, ttl, tick);
            entry.pinned = pinned;
            state.insert(key, entry);
            self.persist_locked(&state);
        }

        counter!("transflow_cache_sets_total").increment(1);
        self.record_gauges();
        Ok(())
    }

    /// Get a value, computing and storing it on a miss.
    pub async fn get_or_set<F, Fut>(&self, key: impl Into<String>, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let key = key.into();
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, value.clone())?;
        Ok(value)
    }

    /// Remove an entry. Returns whether it existed.
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.remove(key).is_some();
            if removed {
                self.persist_locked(&state);
            }
            removed
        };

        if removed {
            self.record_gauges();
        }
        removed
    }

    /// Check for a live entry without touching access statistics.
    pub fn has(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut state = self.state.lock();

        match state.entries.get(key) {
            None => false,
            Some(entry) if entry.is_expired_at(now) => {
                state.remove(key);
                self.persist_locked(&state);
                false
            }
            Some(_) => true,
        }
    }

    /// Drop every entry and reset statistics.
    #[instrument(skip(self))]
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            *state = CacheState::empty();
            self.persist_locked(&state);
        }
        self.record_gauges();
        info!("Cache cleared");
    }

    /// Remove expired entries, then evict least-recently-accessed entries
    /// until the store is within its limits. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let removed = self.cleanup_locked(&mut state, Utc::now());
            if removed > 0 {
                self.persist_locked(&state);
            }
            removed
        };

        if removed > 0 {
            debug!(removed, "Cache cleanup finished");
            self.record_gauges();
        }
        removed
    }

    /// Live keys.
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats()
    }

    /// Copy of the entry for `key`, expired or not.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Stop the cleanup timer and write a final snapshot.
    ///
    /// Returns once every pending snapshot write has finished.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let cleanup_task = self.cleanup_task.lock().take();
        if let Some(handle) = cleanup_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache cleanup task ended abnormally");
            }
        }

        if let Some(file) = &self.snapshot {
            let encoded = {
                let state = self.state.lock();
                let sequence = file.next_sequence();
                SnapshotFile::encode(&snapshot_view(&state)).map(|data| (sequence, data))
            };

            match encoded {
                Ok((sequence, data)) => file.write(sequence, data).await,
                Err(e) => e.log(),
            }
            file.flush().await;
        }

        info!("Cache shut down");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn cleanup_locked(&self, state: &mut CacheState<V>, now: DateTime<Utc>) -> usize {
        let expired = state.sweep_expired(now);
        let mut evicted = state.evict_over_capacity(self.config.max_size);
        if self.config.enable_memory_limit {
            evicted += state.evict_for_memory(self.config.max_memory_usage_bytes, 0, None);
        }

        if evicted > 0 {
            counter!("transflow_cache_evictions_total").increment(evicted as u64);
        }
        expired + evicted
    }

    fn encode(&self, value: V) -> Result<(StoredValue<V>, u64)> {
        let raw = serde_json::to_vec(&value)?;

        if self.config.enable_compression && raw.len() > self.config.compression_threshold_bytes {
            let packed = compression::compress(&raw)?;
            let size = packed.len() as u64;
            debug!(raw = raw.len(), compressed = size, "Compressed cache value");
            return Ok((StoredValue::Gzip(packed), size));
        }

        Ok((StoredValue::Plain(value), raw.len() as u64))
    }

    /// Schedule a snapshot of the state. Must be called with the lock held so
    /// that sequence order matches mutation order.
    fn persist_locked(&self, state: &CacheState<V>) {
        let Some(file) = &self.snapshot else {
            return;
        };

        let sequence = file.next_sequence();
        match SnapshotFile::encode(&snapshot_view(state)) {
            Ok(data) => file.schedule(sequence, data),
            Err(e) => e.log(),
        }
    }

    fn notify(&self, hit: bool) {
        let observer = self.observer.read().as_ref().and_then(Weak::upgrade);
        if let Some(observer) = observer {
            observer.on_access(hit);
        }
    }

    fn record_gauges(&self) {
        let (entries, bytes) = {
            let state = self.state.lock();
            (state.entries.len(), state.total_size_bytes)
        };
        gauge!("transflow_cache_entries").set(entries as f64);
        gauge!("transflow_cache_size_bytes").set(bytes as f64);
    }
}

impl CacheStore<serde_json::Value> {
    /// Get a value and deserialize it into `T`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(TransflowError::from)
    }

    /// Serialize `value` and store it.
    pub fn set_typed<T: Serialize + ?Sized>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }

    pub(crate) fn peek_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.peek(key) {
            Some(value) => Ok(Some(serde_json::from_value(value?)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn set_pinned_typed<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.set_pinned(key, serde_json::to_value(value)?)
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("entries", &self.state.lock().entries.len())
            .finish()
    }
}

fn decode<V: CacheValue>(stored: &StoredValue<V>) -> Result<V> {
    match stored {
        StoredValue::Plain(value) => Ok(value.clone()),
        StoredValue::Gzip(bytes) => {
            let raw = compression::decompress(bytes)?;
            serde_json::from_slice(&raw).map_err(|e| {
                TransflowError::with_internal(
                    ErrorCode::DeserializationError,
                    "Failed to decode cached value",
                    e.to_string(),
                )
            })
        }
    }
}

/// Snapshot layout: an array of `[key, entry]` pairs.
fn snapshot_view<V: Serialize>(state: &CacheState<V>) -> Vec<(&String, &CacheEntry<V>)> {
    state.entries.iter().collect()
}

fn spawn_cleanup_timer<V: CacheValue>(
    store: Weak<CacheStore<V>>,
    cancel: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(store) = store.upgrade() else { break };
                    store.cleanup();
                }
            }
        }
        debug!("Cache cleanup timer stopped");
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(max_size: usize) -> CacheConfig {
        CacheConfig::builder()
            .ttl_seconds(600)
            .max_size(max_size)
            .cleanup_interval_ms(0)
            .build()
    }

    #[test]
    fn test_config_default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_seconds, 3600);
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.cleanup_interval_ms, 60_000);
        assert!(!config.enable_persistence);
        assert!(!config.enable_compression);
        assert_eq!(config.compression_threshold_bytes, 1024);
        assert!(!config.enable_memory_limit);
        assert_eq!(config.max_memory_usage_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .ttl_seconds(5)
            .max_size(10)
            .persistence("/tmp/cache.json")
            .compression(64)
            .memory_limit(4096)
            .build();

        assert_eq!(config.ttl(), Duration::from_secs(5));
        assert_eq!(config.max_size, 10);
        assert!(config.enable_persistence);
        assert_eq!(config.persistence_path, "/tmp/cache.json");
        assert!(config.enable_compression);
        assert_eq!(config.compression_threshold_bytes, 64);
        assert_eq!(config.max_memory_usage_bytes, 4096);
    }

    #[test]
    fn test_config_validation() {
        assert!(config(0).validate().is_err());
        assert!(config(1).validate().is_ok());

        let mut config = config(1);
        config.enable_persistence = true;
        config.persistence_path = "  ".to_string();
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidConfiguration
        );
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = CacheStore::<serde_json::Value>::new(config(10)).await.unwrap();

        cache.set("key1", json!({"text": "hello"})).unwrap();
        assert_eq!(cache.get("key1"), Some(json!({"text": "hello"})));
        assert!(cache.has("key1"));

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert_eq!(cache.get("key1"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_entries_skip_capacity_and_stats() {
        let cache = CacheStore::<serde_json::Value>::new(config(1)).await.unwrap();

        cache.set_pinned("internal", json!({"n": 1})).unwrap();
        cache.set("a", json!(1)).unwrap();
        cache.set("b", json!(2)).unwrap();
        cache.get("b");
        assert_eq!(cache.cleanup(), 1);

        assert!(cache.has("internal"));
        assert!(cache.has("b"));
        assert!(!cache.has("a"));

        let before = cache.stats();
        let peeked: Option<serde_json::Value> = cache.peek_typed("internal").unwrap();
        assert_eq!(peeked, Some(json!({"n": 1})));
        assert_eq!(cache.peek_typed::<serde_json::Value>("missing").unwrap(), None);
        let after = cache.stats();
        assert_eq!((after.hits, after.misses), (before.hits, before.misses));
    }

    #[tokio::test]
    async fn test_size_is_serialized_length() {
        let cache = CacheStore::<String>::new(config(10)).await.unwrap();
        cache.set("k", "abc".to_string()).unwrap();

        // "\"abc\""
        assert_eq!(cache.entry("k").unwrap().size_bytes, 5);
        assert_eq!(cache.stats().total_size_bytes, 5);

        cache.set("k", "abcdef".to_string()).unwrap();
        assert_eq!(cache.stats().total_size_bytes, 8);
    }

    #[tokio::test]
    async fn test_access_accounting() {
        let cache = CacheStore::<u32>::new(config(10)).await.unwrap();
        cache.set("n", 7).unwrap();

        let created = cache.entry("n").unwrap();
        assert_eq!(created.access_count, 0);

        cache.get("n");
        cache.get("n");
        let touched = cache.entry("n").unwrap();
        assert_eq!(touched.access_count, 2);
        assert!(touched.last_accessed_at >= created.last_accessed_at);
        assert!(touched.access_tick > created.access_tick);
    }

    #[tokio::test]
    async fn test_has_does_not_count_access() {
        let cache = CacheStore::<u32>::new(config(10)).await.unwrap();
        cache.set("n", 1).unwrap();

        assert!(cache.has("n"));
        assert!(!cache.has("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(cache.entry("n").unwrap().access_count, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_stats() {
        let cache = CacheStore::<u32>::new(config(10)).await.unwrap();
        cache.set("a", 1).unwrap();
        cache.get("a");
        cache.get("b");

        cache.clear();

        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_compression_is_transparent() {
        let cache = CacheStore::<String>::new(
            CacheConfig::builder()
                .cleanup_interval_ms(0)
                .compression(32)
                .build(),
        )
        .await
        .unwrap();

        let long = "segmento de documento ".repeat(50);
        cache.set("long", long.clone()).unwrap();
        cache.set("short", "hola".to_string()).unwrap();

        let long_entry = cache.entry("long").unwrap();
        assert!(long_entry.value.is_compressed());
        assert!((long_entry.size_bytes as usize) < long.len());
        assert!(!cache.entry("short").unwrap().value.is_compressed());

        assert_eq!(cache.get("long"), Some(long));
        assert_eq!(cache.get("short").as_deref(), Some("hola"));
    }

    #[tokio::test]
    async fn test_memory_limit_evicts_lru() {
        let cache = CacheStore::<String>::new(
            CacheConfig::builder()
                .cleanup_interval_ms(0)
                .memory_limit(30)
                .build(),
        )
        .await
        .unwrap();

        // Each value serializes to 12 bytes.
        cache.set("a", "aaaaaaaaaa".to_string()).unwrap();
        cache.set("b", "bbbbbbbbbb".to_string()).unwrap();
        cache.get("a");
        cache.set("c", "cccccccccc".to_string()).unwrap();

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.stats().total_size_bytes <= 30);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_value_is_still_stored() {
        let cache = CacheStore::<String>::new(
            CacheConfig::builder()
                .cleanup_interval_ms(0)
                .memory_limit(4)
                .build(),
        )
        .await
        .unwrap();

        cache.set("big", "far larger than four bytes".to_string()).unwrap();
        assert!(cache.has("big"));
    }

    #[tokio::test]
    async fn test_get_or_set() {
        let cache = CacheStore::<u64>::new(config(10)).await.unwrap();

        let computed = cache.get_or_set("answer", || async { Ok(42) }).await.unwrap();
        assert_eq!(computed, 42);

        let cached = cache
            .get_or_set("answer", || async { Ok(0) })
            .await
            .unwrap();
        assert_eq!(cached, 42);
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_factory_error() {
        let cache = CacheStore::<u64>::new(config(10)).await.unwrap();

        let result = cache
            .get_or_set("k", || async { Err(TransflowError::internal("provider down")) })
            .await;
        assert!(result.is_err());
        assert!(!cache.has("k"));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Translation {
            text: String,
            target: String,
        }

        let cache = CacheStore::<serde_json::Value>::new(config(10)).await.unwrap();
        let value = Translation {
            text: "bonjour".into(),
            target: "fr".into(),
        };

        cache.set_typed("t", &value).unwrap();
        let back: Option<Translation> = cache.get_typed("t").unwrap();
        assert_eq!(back, Some(value));

        let missing: Option<Translation> = cache.get_typed("missing").unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_observer_sees_hits_and_misses() {
        use std::sync::atomic::{AtomicU64, Ordering};

        #[derive(Default)]
        struct Counts {
            hits: AtomicU64,
            misses: AtomicU64,
        }

        impl CacheObserver for Counts {
            fn on_access(&self, hit: bool) {
                if hit {
                    self.hits.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.misses.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let cache = CacheStore::<u32>::new(config(10)).await.unwrap();
        let counts = Arc::new(Counts::default());
        let observer: Weak<dyn CacheObserver> = Arc::downgrade(&counts) as Weak<dyn CacheObserver>;
        cache.attach_observer(observer);

        cache.set("a", 1).unwrap();
        cache.get("a");
        cache.get("missing");

        assert_eq!(counts.hits.load(Ordering::SeqCst), 1);
        assert_eq!(counts.misses.load(Ordering::SeqCst), 1);

        drop(counts);
        cache.get("a");
    }

    #[tokio::test]
    async fn test_shutdown_stops_timer() {
        let cache = CacheStore::<u32>::new(
            CacheConfig::builder().cleanup_interval_ms(10).build(),
        )
        .await
        .unwrap();

        cache.shutdown().await;
        assert!(cache.cleanup_task.lock().is_none());
        assert!(cache.cancel.is_cancelled());
    }
}
