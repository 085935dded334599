//! Namespaced cache primitive
//!
//! Wraps a [`KeyValueStore`] with key prefixing, case folding and value
//! encoding. Every store failure is logged and swallowed: reads degrade to a
//! miss, writes and deletes become no-ops. Caching is best effort and must
//! never fail the caller's data flow.
//!
//! # Value encoding
//!
//! Raw strings are stored verbatim unless they start with `{` or `[`, so
//! base64 previews round-trip byte for byte. Structured values, and raw
//! strings that would be mistaken for JSON, are stored inside a tagged
//! envelope `{"kind": "raw"|"json", "payload": ...}`. Bare JSON written by
//! older clients is still readable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::store::KeyValueStore;

/// A value as held by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum CacheValue {
    /// Opaque text, e.g. a base64 preview
    Raw(String),
    /// A JSON structure
    Json(serde_json::Value),
}

impl CacheValue {
    /// Encode for the underlying store
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            CacheValue::Raw(text) if !looks_structured(text) => Ok(text.clone()),
            _ => serde_json::to_string(self),
        }
    }

    /// Decode text read from the underlying store
    pub fn decode(text: String) -> Result<Self, serde_json::Error> {
        match text.as_bytes().first() {
            Some(b'{') => match serde_json::from_str::<CacheValue>(&text) {
                Ok(value) => Ok(value),
                Err(_) => serde_json::from_str(&text).map(CacheValue::Json),
            },
            // Envelopes are always objects
            Some(b'[') => serde_json::from_str(&text).map(CacheValue::Json),
            _ => Ok(CacheValue::Raw(text)),
        }
    }

    /// Convert into a typed value
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        match self {
            CacheValue::Raw(text) => serde_json::from_value(serde_json::Value::String(text)),
            CacheValue::Json(value) => serde_json::from_value(value),
        }
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Raw(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Raw(value.to_string())
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Json(value)
    }
}

/// Whether text would be sniffed as JSON by its first character
fn looks_structured(text: &str) -> bool {
    matches!(text.as_bytes().first(), Some(b'{') | Some(b'['))
}

/// One logical table inside a shared key-value store
pub struct NamespacedCache {
    store: Arc<dyn KeyValueStore>,
    /// Prepended to every key, e.g. `@preview_`
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NamespacedCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Physical key for a caller key
    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key).to_lowercase()
    }

    fn record(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Store a value under `key`
    pub async fn put(&self, key: &str, value: impl Into<CacheValue>) {
        let value = value.into();
        let encoded = match value.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(prefix = %self.prefix, key = key, error = %e, "Failed to encode cache value");
                return;
            }
        };

        let store_key = self.store_key(key);
        match self.store.set(&store_key, &encoded).await {
            Ok(()) => debug!(key = %store_key, bytes = encoded.len(), "Cached value"),
            Err(e) => warn!(key = %store_key, error = %e, "Failed to cache value"),
        }
    }

    /// Store any serializable structure under `key`
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.put(key, CacheValue::Json(json)).await,
            Err(e) => {
                warn!(prefix = %self.prefix, key = key, error = %e, "Failed to serialize cache value")
            }
        }
    }

    /// Read the value under `key`, `None` on miss or on any failure
    pub async fn get_value(&self, key: &str) -> Option<CacheValue> {
        let store_key = self.store_key(key);
        let raw = match self.store.get(&store_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %store_key, error = %e, "Failed to read cached value");
                self.record(false);
                return None;
            }
        };

        let value = raw.and_then(|text| match CacheValue::decode(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %store_key, error = %e, "Discarding undecodable cached value");
                None
            }
        });

        self.record(value.is_some());
        trace!(key = %store_key, hit = value.is_some(), "Cache lookup");
        value
    }

    /// Read and convert the value under `key`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match value.into_typed() {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(prefix = %self.prefix, key = key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Read several keys at once
    ///
    /// Returns one entry per requested key, in request order. A failed
    /// store read yields `None` for every key.
    pub async fn get_many(&self, keys: &[String]) -> Vec<(String, Option<CacheValue>)> {
        let store_keys: Vec<String> = keys.iter().map(|k| self.store_key(k)).collect();
        let raw = match self.store.multi_get(&store_keys).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(prefix = %self.prefix, count = keys.len(), error = %e, "Failed to read cached values");
                self.misses.fetch_add(keys.len() as u64, Ordering::Relaxed);
                return keys.iter().map(|k| (k.clone(), None)).collect();
            }
        };

        keys.iter()
            .zip(raw)
            .map(|(key, (_, text))| {
                let value = text.and_then(|text| CacheValue::decode(text).ok());
                self.record(value.is_some());
                (key.clone(), value)
            })
            .collect()
    }

    pub async fn delete(&self, key: &str) {
        let store_key = self.store_key(key);
        match self.store.delete(&store_key).await {
            Ok(()) => debug!(key = %store_key, "Deleted cached value"),
            Err(e) => warn!(key = %store_key, error = %e, "Failed to delete cached value"),
        }
    }

    pub async fn delete_many(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let store_keys: Vec<String> = keys.iter().map(|k| self.store_key(k)).collect();
        match self.store.multi_delete(&store_keys).await {
            Ok(()) => debug!(prefix = %self.prefix, count = keys.len(), "Deleted cached values"),
            Err(e) => {
                warn!(prefix = %self.prefix, count = keys.len(), error = %e, "Failed to delete cached values")
            }
        }
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            prefix = %self.prefix,
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            "Cache metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::FailingStore;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cache() -> (Arc<MemoryStore>, NamespacedCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = NamespacedCache::new(store.clone(), "@test_");
        (store, cache)
    }

    #[tokio::test]
    async fn test_string_round_trip_is_verbatim() {
        let (store, cache) = cache();
        cache.put("1", "iVBORw0KGgo=").await;

        assert_eq!(cache.get::<String>("1").await.as_deref(), Some("iVBORw0KGgo="));
        // Base64 never needs an envelope
        assert_eq!(
            store.get("@test_1").await.unwrap().as_deref(),
            Some("iVBORw0KGgo=")
        );
    }

    #[tokio::test]
    async fn test_json_object_round_trip() {
        let (_, cache) = cache();
        let value = json!({"id": 4, "files": [{"id": 1, "name": "a"}]});
        cache.put_json("folder", &value).await;

        assert_eq!(cache.get::<serde_json::Value>("folder").await, Some(value.clone()));
        assert_eq!(cache.get_value("folder").await, Some(CacheValue::Json(value)));
    }

    #[tokio::test]
    async fn test_raw_string_that_looks_like_json() {
        let (store, cache) = cache();
        cache.put("odd", "{not json").await;
        cache.put("list", "[1, 2]").await;

        assert_eq!(cache.get::<String>("odd").await.as_deref(), Some("{not json"));
        assert_eq!(
            cache.get_value("list").await,
            Some(CacheValue::Raw("[1, 2]".to_string()))
        );
        let stored = store.get("@test_odd").await.unwrap().unwrap();
        assert!(stored.contains(r#""kind":"raw""#));
    }

    #[tokio::test]
    async fn test_reads_legacy_bare_json() {
        let (store, cache) = cache();
        store.set("@test_legacy", r#"{"id":1,"name":"old"}"#).await.unwrap();
        store.set("@test_legacy_list", "[1,2]").await.unwrap();

        assert_eq!(
            cache.get::<serde_json::Value>("legacy").await,
            Some(json!({"id": 1, "name": "old"}))
        );
        assert_eq!(cache.get::<Vec<u32>>("legacy_list").await, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_keys_are_case_insensitive() {
        let (store, cache) = cache();
        cache.put("MiXeD", "value").await;

        assert_eq!(cache.get::<String>("mixed").await.as_deref(), Some("value"));
        assert_eq!(cache.get::<String>("MIXED").await.as_deref(), Some("value"));
        assert!(store.get("@test_mixed").await.unwrap().is_some());

        cache.delete("MIXED").await;
        assert_eq!(cache.get::<String>("mixed").await, None);
    }

    #[tokio::test]
    async fn test_get_many_and_delete_many() {
        let (_, cache) = cache();
        cache.put("1", "one").await;
        cache.put("3", "three").await;

        let keys: Vec<String> = ["1", "2", "3"].iter().map(|k| k.to_string()).collect();
        let values = cache.get_many(&keys).await;
        assert_eq!(
            values,
            vec![
                ("1".to_string(), Some(CacheValue::Raw("one".to_string()))),
                ("2".to_string(), None),
                ("3".to_string(), Some(CacheValue::Raw("three".to_string()))),
            ]
        );

        cache.delete_many(&keys).await;
        assert!(cache.get_many(&keys).await.iter().all(|(_, v)| v.is_none()));
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let cache = NamespacedCache::new(Arc::new(FailingStore), "@test_");

        cache.put("1", "value").await;
        cache.put_json("2", &json!({"a": 1})).await;
        assert_eq!(cache.get::<String>("1").await, None);
        assert_eq!(cache.get_value("2").await, None);

        let keys = vec!["1".to_string(), "2".to_string()];
        assert_eq!(
            cache.get_many(&keys).await,
            vec![("1".to_string(), None), ("2".to_string(), None)]
        );
        cache.delete("1").await;
        cache.delete_many(&keys).await;
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_a_miss() {
        let (_, cache) = cache();
        cache.put("text", "plain").await;
        assert_eq!(cache.get::<Vec<u32>>("text").await, None);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_, cache) = cache();
        assert_eq!(cache.stats(), (0, 0, 0.0));

        assert!(cache.get_value("missing").await.is_none());
        cache.put("present", "x").await;
        assert!(cache.get_value("present").await.is_some());

        let (hits, misses, hit_rate) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }
}
