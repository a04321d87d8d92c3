// repack-common/src/kv.rs
// Narrow interface over the shared key-value store that doubles as the job
// queue and the TTL cache. Key namespacing keeps the tenants apart:
// `task:<id>` / `tasks:index` for the registry, `mp:<hash>` for the
// marketplace cache, `queue:<name>` for queues.
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;

/// Closure applied under the store's per-key lock for read-modify-write.
pub type UpdateFn = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;

/// A value read with `get_stale`, carrying whether its TTL has lapsed.
#[derive(Debug, Clone)]
pub struct StaleValue {
    pub value: Value,
    pub expired: bool,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Returns the value even if its TTL has lapsed. Expired entries are
    /// retained for stale-if-error reads and only replaced by fresh writes.
    async fn get_stale(&self, key: &str) -> Result<Option<StaleValue>>;

    /// Writes a value, optionally with a TTL. No TTL means the entry never
    /// expires (tasks are reaped by the external retention sweep, not here).
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Atomic read-modify-write of one key. The closure sees the current
    /// value (ignoring expiry) and returns the replacement; `None` leaves
    /// the key untouched. Returns the value after the call.
    async fn update(&self, key: &str, f: UpdateFn) -> Result<Option<Value>>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Non-expired keys starting with `prefix`, unordered.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// FIFO queue append.
    async fn push(&self, queue: &str, value: Value) -> Result<()>;

    /// FIFO queue pop; `None` when the queue is empty.
    async fn pop(&self, queue: &str) -> Result<Option<Value>>;
}

struct Entry {
    value: Value,
    written_at: Instant,
    ttl: Option<Duration>,
}

impl Entry {
    fn expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.written_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// In-process stand-in for the external store. One instance per engine (and
/// a fresh one per test); never a module-level singleton.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    queues: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn get_stale(&self, key: &str) -> Result<Option<StaleValue>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|e| StaleValue {
            value: e.value.clone(),
            expired: e.expired(),
        }))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        trace!("kv put {key} (ttl: {ttl:?})");
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                written_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn update(&self, key: &str, f: UpdateFn) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).map(|e| e.value.clone());
        match f(current.clone()) {
            Some(next) => {
                let ttl = entries.get(key).and_then(|e| e.ttl);
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: next.clone(),
                        written_at: Instant::now(),
                        ttl,
                    },
                );
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.expired())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn push(&self, queue: &str, value: Value) -> Result<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().push_back(value);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Value>> {
        let mut queues = self.queues.lock().await;
        Ok(queues.get_mut(queue).and_then(|q| q.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn get_respects_ttl_but_stale_read_survives() {
        let store = MemoryStore::new();
        store
            .put("mp:abc", json!({"n": 1}), Some(Duration::from_millis(10)))
            .await
            .unwrap();

        assert!(store.get("mp:abc").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(store.get("mp:abc").await.unwrap().is_none());
        let stale = store.get_stale("mp:abc").await.unwrap().unwrap();
        assert!(stale.expired);
        assert_eq!(stale.value["n"], 1);
    }

    #[tokio::test]
    async fn update_is_read_modify_write() {
        let store = MemoryStore::new();
        store.put("task:1", json!({"n": 1}), None).await.unwrap();

        let after = store
            .update(
                "task:1",
                Box::new(|current| {
                    let n = current.unwrap()["n"].as_i64().unwrap();
                    Some(json!({ "n": n + 1 }))
                }),
            )
            .await
            .unwrap();
        assert_eq!(after.unwrap()["n"], 2);

        // Returning None leaves the key untouched.
        let unchanged = store
            .update("task:1", Box::new(|_| None))
            .await
            .unwrap();
        assert_eq!(unchanged.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let store = MemoryStore::new();
        store.push("queue:repackage", json!(1)).await.unwrap();
        store.push("queue:repackage", json!(2)).await.unwrap();

        assert_eq!(store.pop("queue:repackage").await.unwrap(), Some(json!(1)));
        assert_eq!(store.pop("queue:repackage").await.unwrap(), Some(json!(2)));
        assert_eq!(store.pop("queue:repackage").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_filters_by_namespace() {
        let store = MemoryStore::new();
        store.put("task:a", json!(1), None).await.unwrap();
        store.put("task:b", json!(2), None).await.unwrap();
        store.put("mp:x", json!(3), None).await.unwrap();

        let mut keys = store.keys("task:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task:a", "task:b"]);
    }
}
