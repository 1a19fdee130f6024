//! Per-process monitoring storage over a key-value accessor.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use taskmesh_context::Context;
use taskmesh_errors::is_skip_message;
use taskmesh_errors::NilResponse;

use super::KeyValue;
use super::KeyValueTx;
use super::FAILOVER_TASK_NAME;
use crate::ApplicationInfo;
use crate::MetricReader;
use crate::MetricUpdater;
use crate::TaskEvent;
use crate::TaskInfo;

/// Key-value backed implementation of the monitoring storage schema.
///
/// Keys are scoped by application name `A` and host `H`:
///
/// - `A:app_H`: JSON [`ApplicationInfo`] for the process (no expiry).
/// - `A:metric_H_$_<task>_total|_error|_skip|_min|_avg|_max`: counters and
///   nanosecond durations for each task.
/// - `A:metric_H_$_receive|_receive_error`: global receive counters.
/// - `A:metric_H_$_<uuid>`: JSON [`TaskInfo`] per event chain, with a
///   configurable lifetime (only when per-event detail is enabled).
pub struct Storage {
    client: Arc<dyn KeyValue>,
    app_info: RwLock<Option<ApplicationInfo>>,
    task_info: Mutex<HashMap<String, TaskInfo>>,
    task_lifetime: Option<Duration>,
}

impl Storage {
    /// Storage connector over the given key-value accessor.
    pub fn new(client: Arc<dyn KeyValue>) -> Storage {
        Storage {
            client,
            app_info: RwLock::new(None),
            task_info: Mutex::new(HashMap::new()),
            task_lifetime: None,
        }
    }

    /// Also persist per event-ID detail records, expiring after `lifetime`.
    pub fn with_task_detail(mut self, lifetime: Duration) -> Storage {
        self.task_lifetime = Some(lifetime);
        self
    }

    /// Storage view over the record another process registered.
    pub(crate) async fn with_application(
        client: Arc<dyn KeyValue>,
        name: &str,
        host: &str,
    ) -> Result<Storage> {
        let storage = Storage::new(client);
        let key = format!("{}:app_{}", name, host);
        let mut info: ApplicationInfo = storage.get_json(&key).await?.unwrap_or_default();
        if info.name.is_empty() {
            info.name = name.to_string();
        }
        if info.host.is_empty() {
            info.host = host.to_string();
        }
        *storage.app_info.write().expect("application info lock poisoned") = Some(info);
        Ok(storage)
    }

    /// The application record this storage tracks, if registered.
    pub fn application(&self) -> Option<ApplicationInfo> {
        self.app_info
            .read()
            .expect("application info lock poisoned")
            .clone()
    }

    fn main_key(&self) -> String {
        let info = self.application().unwrap_or_default();
        format!("{}:app_{}", info.name, info.host)
    }

    fn metric_key(&self, key: &str) -> String {
        let info = self.application().unwrap_or_default();
        format!("{}:metric_{}_$_{}", info.name, info.host, key)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let data = match self.client.get(key).await {
            Ok(data) => data,
            Err(error) if error.is::<NilResponse>() => return Ok(None),
            Err(error) => return Err(error),
        };
        let value = serde_json::from_str(&data)?;
        Ok(Some(value))
    }

    /// Load cached task counters, filling the cache from the store on first use.
    async fn load_task_info(
        &self,
        cache: &mut HashMap<String, TaskInfo>,
        name: &str,
    ) -> Result<TaskInfo> {
        if let Some(info) = cache.get(name) {
            return Ok(info.clone());
        }
        let keys = [
            self.metric_key(&format!("{}_total", name)),
            self.metric_key(&format!("{}_error", name)),
            self.metric_key(&format!("{}_skip", name)),
            self.metric_key(&format!("{}_min", name)),
            self.metric_key(&format!("{}_avg", name)),
            self.metric_key(&format!("{}_max", name)),
        ];
        let values = self.client.mget(&keys).await?;
        let number = |idx: usize| -> u64 {
            values
                .get(idx)
                .and_then(|value| value.as_deref())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0)
        };
        let total = number(0);
        let errors = number(1);
        let skips = number(2);
        let now = time::OffsetDateTime::now_utc();
        let info = TaskInfo {
            total_count: total,
            error_count: errors,
            skip_count: skips,
            success_count: total.saturating_sub(errors).saturating_sub(skips),
            min_exec_time: Duration::from_nanos(number(3)),
            avg_exec_time: Duration::from_nanos(number(4)),
            max_exec_time: Duration::from_nanos(number(5)),
            created_at: Some(now),
            updated_at: Some(now),
            ..TaskInfo::default()
        };
        cache.insert(name.to_string(), info.clone());
        Ok(info)
    }

    async fn set_json<T: Serialize>(
        &self,
        tx: &mut Box<dyn KeyValueTx>,
        key: &str,
        value: &T,
        expire: Option<Duration>,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        tx.set(key, &data, expire).await
    }

    /// Commit one execution into the schema, all keys in one transaction.
    async fn commit_execution(
        &self,
        event: &TaskEvent,
        exec_time: Duration,
    ) -> Result<()> {
        let mut cache = self.task_info.lock().await;
        let mut info = self.load_task_info(&mut cache, &event.name).await?;
        let mut tx = self.client.begin().await?;

        // Update the per event-ID record when detail tracking is enabled.
        if let (Some(lifetime), Some(id)) = (self.task_lifetime, event.id) {
            let id = id.to_string();
            let key = self.metric_key(&id);
            let mut id_info: TaskInfo = self.get_json(&key).await?.unwrap_or_default();
            id_info.inc(event.error.as_deref(), exec_time);
            id_info.add_task_name(&event.name);
            self.set_json(&mut tx, &key, &id_info, Some(lifetime)).await?;
        }

        // Update the general task counters.
        info.inc(event.error.as_deref(), exec_time);
        tx.incr(&self.metric_key(&format!("{}_total", event.name))).await?;
        if let Some(error) = &event.error {
            if is_skip_message(error) {
                tx.incr(&self.metric_key(&format!("{}_skip", event.name))).await?;
            } else {
                tx.incr(&self.metric_key(&format!("{}_error", event.name))).await?;
            }
        }
        tx.mset(&[
            (
                self.metric_key(&format!("{}_min", event.name)),
                (info.min_exec_time.as_nanos() as u64).to_string(),
            ),
            (
                self.metric_key(&format!("{}_avg", event.name)),
                (info.avg_exec_time.as_nanos() as u64).to_string(),
            ),
            (
                self.metric_key(&format!("{}_max", event.name)),
                (info.max_exec_time.as_nanos() as u64).to_string(),
            ),
        ])
        .await?;
        cache.insert(event.name.clone(), info);
        tx.commit().await
    }
}

#[async_trait::async_trait]
impl MetricUpdater for Storage {
    async fn register_application(&self, _: &Context, info: &ApplicationInfo) -> Result<()> {
        *self.app_info.write().expect("application info lock poisoned") = Some(info.clone());
        let data = serde_json::to_string(info)?;
        self.client.set(&self.main_key(), &data, None).await
    }

    async fn deregister_application(&self, _: &Context) -> Result<()> {
        self.client.del(&[self.main_key()]).await
    }

    async fn receive_event(&self, _: &Context, event: &TaskEvent) -> Result<()> {
        let key = if event.is_error() {
            self.metric_key("receive_error")
        } else {
            self.metric_key("receive")
        };
        self.client.incr(&key).await?;
        Ok(())
    }

    async fn execute_task(
        &self,
        _: &Context,
        event: &TaskEvent,
        exec_time: Duration,
    ) -> Result<()> {
        self.commit_execution(event, exec_time).await
    }

    async fn execute_failover_task(
        &self,
        context: &Context,
        event: &TaskEvent,
        exec_time: Duration,
    ) -> Result<()> {
        let event = event.with_name(FAILOVER_TASK_NAME);
        self.execute_task(context, &event, exec_time).await
    }
}

#[async_trait::async_trait]
impl MetricReader for Storage {
    async fn application_info(&self, _: &Context) -> Result<Option<ApplicationInfo>> {
        Ok(self.application())
    }

    async fn receive_count(&self, _: &Context) -> Result<u64> {
        let value = match self.client.get(&self.metric_key("receive")).await {
            Ok(value) => value,
            Err(error) if error.is::<NilResponse>() => return Ok(0),
            Err(error) => return Err(error),
        };
        Ok(value.parse().unwrap_or(0))
    }

    async fn task_info(&self, _: &Context, name: &str) -> Result<TaskInfo> {
        let mut cache = self.task_info.lock().await;
        self.load_task_info(&mut cache, name).await
    }

    async fn failover_task_info(&self, context: &Context) -> Result<TaskInfo> {
        self.task_info(context, FAILOVER_TASK_NAME).await
    }
}

impl Storage {
    /// Per event-ID record, when detail tracking persisted one.
    pub async fn task_info_by_id(&self, _: &Context, id: &str) -> Result<TaskInfo> {
        let key = self.metric_key(id);
        let mut info: TaskInfo = self.get_json(&key).await?.unwrap_or_default();
        info.success_count = info
            .total_count
            .saturating_sub(info.error_count)
            .saturating_sub(info.skip_count);
        Ok(info)
    }
}
