//! In-memory key-value accessor for local development and unit tests.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::Mutex;

use taskmesh_errors::NilResponse;

use crate::kvstorage::KeyValue;
use crate::kvstorage::KeyValueTx;

/// In-memory [`KeyValue`] implementation with expiry support.
///
/// Shared by cloning; every clone operates on the same data set.
#[derive(Clone, Default)]
pub struct MemoryKv {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn alive(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

impl MemoryKv {
    pub fn new() -> MemoryKv {
        MemoryKv::default()
    }

    fn entry(value: String, expire: Option<Duration>) -> Entry {
        Entry {
            value,
            expires_at: expire.map(|expire| Instant::now() + expire),
        }
    }

    async fn apply(&self, ops: Vec<TxOp>) -> Result<()> {
        let mut data = self.data.lock().await;
        for op in ops {
            match op {
                TxOp::Set { key, value, expire } => {
                    data.insert(key, MemoryKv::entry(value, expire));
                }
                TxOp::Incr { key } => {
                    incr_entry(&mut data, &key)?;
                }
                TxOp::MSet { pairs } => {
                    for (key, value) in pairs {
                        data.insert(key, MemoryKv::entry(value, None));
                    }
                }
            }
        }
        Ok(())
    }
}

fn incr_entry(data: &mut HashMap<String, Entry>, key: &str) -> Result<i64> {
    let current = data
        .get(key)
        .filter(|entry| entry.alive())
        .and_then(|entry| entry.value.parse::<i64>().ok())
        .unwrap_or(0);
    let next = current + 1;
    data.insert(key.to_string(), MemoryKv::entry(next.to_string(), None));
    Ok(next)
}

#[async_trait::async_trait]
impl KeyValue for MemoryKv {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(key, entry)| entry.alive() && key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<String> {
        let data = self.data.lock().await;
        data.get(key)
            .filter(|entry| entry.alive())
            .map(|entry| entry.value.clone())
            .ok_or_else(|| NilResponse.into())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let data = self.data.lock().await;
        let values = keys
            .iter()
            .map(|key| {
                data.get(key)
                    .filter(|entry| entry.alive())
                    .map(|entry| entry.value.clone())
            })
            .collect();
        Ok(values)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut data = self.data.lock().await;
        incr_entry(&mut data, key)
    }

    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> Result<()> {
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), MemoryKv::entry(value.to_string(), expire));
        Ok(())
    }

    async fn mset(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut data = self.data.lock().await;
        for (key, value) in pairs {
            data.insert(key.clone(), MemoryKv::entry(value.clone(), None));
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut data = self.data.lock().await;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn KeyValueTx>> {
        Ok(Box::new(MemoryKvTx {
            store: self.clone(),
            ops: Vec::new(),
        }))
    }
}

enum TxOp {
    Set {
        key: String,
        value: String,
        expire: Option<Duration>,
    },
    Incr {
        key: String,
    },
    MSet {
        pairs: Vec<(String, String)>,
    },
}

/// Buffered transaction over a [`MemoryKv`].
struct MemoryKvTx {
    store: MemoryKv,
    ops: Vec<TxOp>,
}

#[async_trait::async_trait]
impl KeyValueTx for MemoryKvTx {
    async fn incr(&mut self, key: &str) -> Result<()> {
        self.ops.push(TxOp::Incr {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &str, expire: Option<Duration>) -> Result<()> {
        self.ops.push(TxOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            expire,
        });
        Ok(())
    }

    async fn mset(&mut self, pairs: &[(String, String)]) -> Result<()> {
        self.ops.push(TxOp::MSet {
            pairs: pairs.to_vec(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let store = self.store.clone();
        store.apply(self.ops).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use taskmesh_errors::NilResponse;

    use super::KeyValue;
    use super::MemoryKv;

    #[tokio::test]
    async fn expired_keys_vanish() {
        let kv = MemoryKv::new();
        kv.set("gone", "1", Some(Duration::from_millis(5))).await.unwrap();
        kv.set("kept", "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let error = kv.get("gone").await.unwrap_err();
        assert!(error.is::<NilResponse>());
        assert_eq!(kv.get("kept").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn incr_counts_from_zero() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("hits").await.unwrap(), 1);
        assert_eq!(kv.incr("hits").await.unwrap(), 2);
        assert_eq!(kv.get("hits").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn prefix_listing() {
        let kv = MemoryKv::new();
        kv.set("counter:app_10.0.0.1", "{}", None).await.unwrap();
        kv.set("counter:app_10.0.0.2", "{}", None).await.unwrap();
        kv.set("counter:metric_10.0.0.1_$_receive", "4", None).await.unwrap();
        let keys = kv.keys("counter:app_*").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "counter:app_10.0.0.1".to_string(),
                "counter:app_10.0.0.2".to_string(),
            ],
        );
    }

    #[tokio::test]
    async fn transactions_apply_on_commit() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin().await.unwrap();
        tx.incr("total").await.unwrap();
        tx.set("record", "{}", None).await.unwrap();
        assert!(kv.get("total").await.is_err());
        tx.commit().await.unwrap();
        assert_eq!(kv.get("total").await.unwrap(), "1");
        assert_eq!(kv.get("record").await.unwrap(), "{}");
    }
}
