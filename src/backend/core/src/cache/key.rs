//! Cache key construction.
//!
//! Keys are `:`-joined strings built from an optional namespace, a key-type
//! prefix, an optional version and any number of segments. Provider results
//! are keyed by a SHA-256 digest of their inputs so that long source texts
//! never end up inside a key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Key Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Kinds of cached data, each with a prefix and a default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Finished translation of a segment
    Translation,

    /// Review outcome
    Review,

    /// Validation report
    Validation,

    /// Quality-check score
    QualityCheck,

    /// Raw AI-provider response
    ProviderResponse,

    /// Monitor snapshots
    Metrics,

    Custom,
}

impl KeyType {
    /// Get the default TTL for this key type.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::Translation => Duration::from_secs(24 * 3600),
            Self::Review => Duration::from_secs(3600),
            Self::Validation => Duration::from_secs(3600),
            Self::QualityCheck => Duration::from_secs(3600),
            Self::ProviderResponse => Duration::from_secs(6 * 3600),
            Self::Metrics => Duration::from_secs(300),
            Self::Custom => Duration::from_secs(3600),
        }
    }

    /// Get the key type prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Review => "review",
            Self::Validation => "validation",
            Self::QualityCheck => "quality_check",
            Self::ProviderResponse => "provider",
            Self::Metrics => "metrics",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key
// ═══════════════════════════════════════════════════════════════════════════════

/// A structured cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key_type: KeyType,

    /// Namespace (e.g. project id)
    namespace: Option<String>,

    /// Key segments after the prefix
    segments: Vec<String>,

    /// Custom TTL override
    ttl: Option<Duration>,

    /// Key version for cache busting
    version: Option<u32>,
}

impl CacheKey {
    /// Create a new cache key with the given type.
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            namespace: None,
            segments: Vec::new(),
            ttl: None,
            version: None,
        }
    }

    /// Key for a translation of `text` between two languages with a model.
    pub fn translation(text: &str, source_lang: &str, target_lang: &str, model: &str) -> Self {
        Self::new(KeyType::Translation)
            .with_segment(format!("{}-{}", source_lang, target_lang))
            .with_segment(content_hash([text, source_lang, target_lang, model]))
    }

    /// Key for a raw provider response to `prompt`.
    pub fn provider_response(provider: &str, model: &str, prompt: &str) -> Self {
        Self::new(KeyType::ProviderResponse)
            .with_segment(provider)
            .with_segment(content_hash([provider, model, prompt]))
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a key segment.
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Add multiple key segments.
    pub fn with_segments(mut self, segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.segments.extend(segments.into_iter().map(|s| s.into()));
        self
    }

    /// Set custom TTL override.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set key version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Custom TTL, or the key type's default.
    pub fn ttl(&self) -> Duration {
        self.ttl.unwrap_or_else(|| self.key_type.default_ttl())
    }

    /// Build the cache key string.
    pub fn build(&self) -> String {
        let mut parts = Vec::with_capacity(self.segments.len() + 3);

        if let Some(ref ns) = self.namespace {
            parts.push(ns.clone());
        }

        parts.push(self.key_type.prefix().to_string());

        if let Some(version) = self.version {
            parts.push(format!("v{}", version));
        }

        parts.extend(self.segments.iter().cloned());

        parts.join(":")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

impl From<&CacheKey> for String {
    fn from(key: &CacheKey) -> Self {
        key.build()
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.build()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Content Hashing
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable hex SHA-256 digest over `parts`.
///
/// Parts are length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref().as_bytes();
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_build() {
        let key = CacheKey::new(KeyType::Review)
            .with_namespace("project-7")
            .with_version(2)
            .with_segments(["doc-1", "seg-4"]);

        assert_eq!(key.build(), "project-7:review:v2:doc-1:seg-4");
        assert_eq!(key.to_string(), key.build());
        assert_eq!(String::from(&key), key.build());
    }

    #[test]
    fn test_bare_key() {
        assert_eq!(CacheKey::new(KeyType::Metrics).build(), "metrics");
    }

    #[test]
    fn test_ttl_override() {
        let key = CacheKey::new(KeyType::Metrics);
        assert_eq!(key.ttl(), Duration::from_secs(300));

        let key = key.with_ttl(Duration::from_secs(5));
        assert_eq!(key.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_content_hash_is_stable_and_unambiguous() {
        let a = content_hash(["ab", "c"]);
        assert_eq!(a, content_hash(vec!["ab".to_string(), "c".to_string()]));
        assert_ne!(a, content_hash(["a", "bc"]));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_translation_key() {
        let key = CacheKey::translation("Hello world", "en", "es", "gpt-4o");
        let built = key.build();

        assert!(built.starts_with("translation:en-es:"));
        assert!(!built.contains("Hello"));
        assert_eq!(built, CacheKey::translation("Hello world", "en", "es", "gpt-4o").build());
        assert_ne!(built, CacheKey::translation("Hello world", "en", "fr", "gpt-4o").build());
        assert_eq!(key.ttl(), KeyType::Translation.default_ttl());
    }

    #[test]
    fn test_provider_key() {
        let key = CacheKey::provider_response("openai", "gpt-4o", "Translate: hi");
        assert!(key.build().starts_with("provider:openai:"));
        assert_eq!(key.key_type(), KeyType::ProviderResponse);
    }
}
