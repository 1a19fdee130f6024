//! Monitoring storage schema over a shared key-value store.
//!
//! Every process writes its application record and per-task counters under a
//! key prefix derived from the application name and host. Any key-value store
//! with the small [`KeyValue`] contract below (redis being the reference
//! deployment) can back the schema; the store itself is provided by the
//! application.
use std::time::Duration;

use anyhow::Result;

mod reader;
mod storage;

#[cfg(test)]
mod tests;

pub use self::reader::ClusterReader;
pub use self::storage::Storage;

/// Task name used to aggregate failover executions.
pub const FAILOVER_TASK_NAME: &str = "$failover";

/// Basic data accessors expected from the backing key-value store.
///
/// Empty reads fail with the [`NilResponse`](taskmesh_errors::NilResponse)
/// sentinel so callers can tell missing keys from store failures.
#[async_trait::async_trait]
pub trait KeyValue: Send + Sync {
    /// List keys matching a `prefix*` pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Fetch the value stored under a key.
    async fn get(&self, key: &str) -> Result<String>;

    /// Fetch values for a batch of keys, in the same order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Increment the integer value stored under a key.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Store a value under a key, with an optional expiry.
    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> Result<()>;

    /// Store a batch of key/value pairs.
    async fn mset(&self, pairs: &[(String, String)]) -> Result<()>;

    /// Delete keys from the store.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Start a transaction that applies its changes only on commit.
    async fn begin(&self) -> Result<Box<dyn KeyValueTx>>;
}

/// Write operations buffered into a transaction.
#[async_trait::async_trait]
pub trait KeyValueTx: Send + Sync {
    /// Increment the integer value stored under a key.
    async fn incr(&mut self, key: &str) -> Result<()>;

    /// Store a value under a key, with an optional expiry.
    async fn set(&mut self, key: &str, value: &str, expire: Option<Duration>) -> Result<()>;

    /// Store a batch of key/value pairs.
    async fn mset(&mut self, pairs: &[(String, String)]) -> Result<()>;

    /// Apply every buffered change atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}
