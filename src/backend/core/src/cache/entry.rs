//! Cache entries and statistics.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Stored Value
// ═══════════════════════════════════════════════════════════════════════════════

/// How a value is held inside an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum StoredValue<V> {
    /// The value itself
    Plain(V),
    /// Gzip-compressed JSON encoding of the value
    Gzip(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl<V> StoredValue<V> {
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Gzip(_))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A cached value with expiry and access accounting.
///
/// Timestamps serialize as epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: StoredValue<V>,

    /// Entry is absent from `expires_at` on
    #[serde(with = "ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts_milliseconds")]
    pub last_accessed_at: DateTime<Utc>,

    /// Number of reads that returned this entry
    pub access_count: u64,

    /// Length of the stored encoding in bytes
    pub size_bytes: u64,

    /// Store-wide access counter value at the last touch; orders accesses
    /// that share a millisecond
    #[serde(default)]
    pub(crate) access_tick: u64,

    /// Internal entry outside capacity and LRU accounting
    #[serde(default)]
    pub pinned: bool,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(
        value: StoredValue<V>,
        size_bytes: u64,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        tick: u64,
    ) -> Self {
        Self {
            value,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            access_tick: tick,
            pinned: false,
        }
    }

    /// Check whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check whether the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>, tick: u64) {
        self.last_accessed_at = now;
        self.access_count += 1;
        self.access_tick = tick;
    }

    /// LRU ordering key: oldest access first.
    pub(crate) fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed_at, self.access_tick)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of live entries
    pub item_count: u64,

    /// Reads that returned a value
    pub hits: u64,

    /// Reads that found nothing or an expired entry
    pub misses: u64,

    /// Sum of entry sizes in bytes
    pub total_size_bytes: u64,

    /// hits / (hits + misses), 0 before the first read
    pub hit_rate: f64,

    /// Entries removed to respect capacity or memory limits
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate.
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}
