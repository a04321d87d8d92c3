// repack-net/src/marketplace/cache.rs
// Write-through response cache over the shared KV store. Entries live in
// the `mp:` namespace so they never collide with task keys.
use std::sync::Arc;
use std::time::Duration;

use repack_common::error::Result;
use repack_common::kv::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::trace;

const KEY_NAMESPACE: &str = "mp:";

/// A cached value plus whether it came from the scrape path originally.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub(crate) struct CachedResponse {
    pub value: Value,
    pub fallback_used: bool,
}

pub(crate) struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        ResponseCache { store, ttl }
    }

    /// Deterministic cache key: operation name plus parameters in stable
    /// (sorted) order with lowercased values, hashed so arbitrary query
    /// strings stay within key-length limits.
    pub fn key(operation: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(operation.to_lowercase().as_bytes());
        for (k, v) in &sorted {
            hasher.update(b"\x1f");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        format!("{KEY_NAMESPACE}{}", hex::encode(hasher.finalize()))
    }

    /// Fresh (non-expired) cached value, if any.
    pub async fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, bool)>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(decode(raw)),
            None => Ok(None),
        }
    }

    /// Most recent cached value regardless of expiry, for stale-if-error.
    pub async fn get_any<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, bool)>> {
        match self.store.get_stale(key).await? {
            Some(stale) => Ok(decode(stale.value)),
            None => Ok(None),
        }
    }

    /// Written only on a successful upstream call (API or scrape).
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, fallback_used: bool) -> Result<()> {
        let cached = CachedResponse {
            value: serde_json::to_value(value)?,
            fallback_used,
        };
        trace!("marketplace cache write {key} (fallback: {fallback_used})");
        self.store
            .put(key, serde_json::to_value(&cached)?, Some(self.ttl))
            .await
    }
}

fn decode<T: DeserializeOwned>(raw: Value) -> Option<(T, bool)> {
    let cached: CachedResponse = serde_json::from_value(raw).ok()?;
    let value: T = serde_json::from_value(cached.value).ok()?;
    Some((value, cached.fallback_used))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_and_case_insensitive() {
        let a = ResponseCache::key("search", &[("query", "Agent"), ("page", "1")]);
        let b = ResponseCache::key("search", &[("page", "1"), ("query", "agent")]);
        assert_eq!(a, b);
        assert!(a.starts_with("mp:"));
    }

    #[test]
    fn key_distinguishes_operations_and_params() {
        let a = ResponseCache::key("search", &[("query", "agent")]);
        let b = ResponseCache::key("plugin", &[("query", "agent")]);
        let c = ResponseCache::key("search", &[("query", "tools")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
