use crate::persistence::{Error, KeyValue, Persistence, Result};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;

/// A process-local key space. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemory {
    data: Mutex<HashMap<String, String>>,
}

// === impl InMemory ===

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Persistence for InMemory {
    async fn get_all(&self) -> Result<Vec<KeyValue>> {
        let data = self.data.lock();
        Ok(data
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<KeyValue> {
        self.data
            .lock()
            .get(key)
            .map(|value| KeyValue::new(key, value.clone()))
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn set(&self, KeyValue { key, value }: KeyValue) -> Result<()> {
        self.data.lock().insert(key, value);
        Ok(())
    }

    async fn pre_set(&self, KeyValue { key, value }: KeyValue) -> Result<()> {
        self.data.lock().entry(key).or_insert(value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.data.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_then_get() {
        let store = InMemory::new();
        store.set(KeyValue::new("color", "red")).await.unwrap();

        assert_eq!(
            store.get("color").await.unwrap(),
            KeyValue::new("color", "red")
        );
        assert_eq!(
            store.get_all().await.unwrap(),
            vec![KeyValue::new("color", "red")]
        );
    }

    #[tokio::test]
    async fn pre_set_does_not_clobber() {
        let store = InMemory::new();
        store.pre_set(KeyValue::new("k", "v1")).await.unwrap();
        store.pre_set(KeyValue::new("k", "v2")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().value, "v1");

        // A user edit is not reverted by a later seed.
        store.set(KeyValue::new("k", "edited")).await.unwrap();
        store.pre_set(KeyValue::new("k", "v1")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().value, "edited");
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = InMemory::new();
        store.set(KeyValue::new("k", "v1")).await.unwrap();
        store.set(KeyValue::new("k", "v2")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().value, "v2");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = InMemory::new();
        let error = store.get("nope").await.expect_err("key must not exist");
        assert!(matches!(error, Error::KeyNotFound(k) if k == "nope"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemory::new();
        store.set(KeyValue::new("a", "1")).await.unwrap();

        store.delete("absent").await.expect("deleting absent key succeeds");
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_all_returns_every_key() {
        let store = InMemory::new();
        store.pre_set(KeyValue::new("key1", "value1")).await.unwrap();
        store.pre_set(KeyValue::new("key2", "value2")).await.unwrap();

        let mut all = store.get_all().await.unwrap();
        all.sort();
        assert_eq!(
            all,
            vec![
                KeyValue::new("key1", "value1"),
                KeyValue::new("key2", "value2")
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers() {
        const TASKS: usize = 16;
        const KEYS: usize = 50;

        let store = Arc::new(InMemory::new());
        let tasks = (0..TASKS)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    for j in 0..KEYS {
                        store
                            .set(KeyValue::new(format!("task{i}-{j}"), "set"))
                            .await
                            .unwrap();
                        // Every task races to seed the same keys.
                        store
                            .pre_set(KeyValue::new(format!("shared-{j}"), i.to_string()))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.expect("task must not panic");
        }

        assert_eq!(store.count().await.unwrap(), TASKS * KEYS + KEYS);
        assert_eq!(store.get_all().await.unwrap().len(), TASKS * KEYS + KEYS);
        for j in 0..KEYS {
            let seeded = store.get(&format!("shared-{j}")).await.unwrap().value;
            assert!(seeded.parse::<usize>().unwrap() < TASKS, "{seeded}");
        }
    }
}
