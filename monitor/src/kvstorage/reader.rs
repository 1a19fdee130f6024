//! Cluster-wide view over every process registered in the key-value store.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::Mutex;

use taskmesh_context::Context;

use super::KeyValue;
use super::Storage;
use crate::ApplicationInfo;
use crate::ClusterInfoReader;
use crate::TaskInfo;

const CACHE_LIFETIME: Duration = Duration::from_secs(60);

/// Aggregate reader over the storages of every node in the listed applications.
pub struct ClusterReader {
    app_names: Vec<String>,
    client: Arc<dyn KeyValue>,
    cache: Mutex<StorageCache>,
    cache_lifetime: Duration,
}

#[derive(Default)]
struct StorageCache {
    list: Vec<Arc<Storage>>,
    refreshed: Option<Instant>,
}

impl ClusterReader {
    /// Reader for the given application names.
    pub fn new<I, S>(client: Arc<dyn KeyValue>, app_names: I) -> ClusterReader
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClusterReader {
            app_names: app_names.into_iter().map(Into::into).collect(),
            client,
            cache: Mutex::new(StorageCache::default()),
            cache_lifetime: CACHE_LIFETIME,
        }
    }

    /// Forget the cached node list so the next read rebuilds it.
    pub async fn reset_cache(&self) {
        let mut cache = self.cache.lock().await;
        cache.list.clear();
        cache.refreshed = None;
    }

    /// Per-node storages, rebuilt when the cached list expired.
    async fn list_storages(&self, context: &Context) -> Result<Vec<Arc<Storage>>> {
        let mut cache = self.cache.lock().await;
        let fresh = cache
            .refreshed
            .map(|at| at.elapsed() <= self.cache_lifetime)
            .unwrap_or(false);
        if fresh && !cache.list.is_empty() {
            return Ok(cache.list.clone());
        }
        let nodes = self.load_nodes().await?;
        let mut list = Vec::new();
        for (app_name, hosts) in nodes {
            for host in hosts {
                let client = Arc::clone(&self.client);
                match Storage::with_application(client, &app_name, &host).await {
                    Ok(storage) => list.push(Arc::new(storage)),
                    Err(error) => slog::warn!(
                        context.logger, "Failed to load node storage";
                        "app" => &app_name, "host" => &host,
                        "error" => %error,
                    ),
                }
            }
        }
        cache.list = list.clone();
        cache.refreshed = Some(Instant::now());
        Ok(list)
    }

    async fn load_nodes(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut nodes = HashMap::new();
        for app_name in &self.app_names {
            let prefix = format!("{}:app_", app_name);
            let keys = self.client.keys(&format!("{}*", prefix)).await?;
            let hosts = keys
                .iter()
                .map(|key| key.trim_start_matches(&prefix).to_string())
                .collect();
            nodes.insert(app_name.clone(), hosts);
        }
        Ok(nodes)
    }
}

#[async_trait::async_trait]
impl ClusterInfoReader for ClusterReader {
    async fn application_info(&self, context: &Context) -> Result<ApplicationInfo> {
        let storages = self.list_storages(context).await?;
        let mut info = ApplicationInfo::default();
        for storage in storages {
            if let Some(node) = storage.application() {
                info.merge(&node);
            }
        }
        Ok(info)
    }

    async fn task_info(&self, context: &Context, name: &str) -> Result<TaskInfo> {
        let storages = self.list_storages(context).await?;
        let mut info = TaskInfo::default();
        for storage in storages {
            let node = crate::MetricReader::task_info(storage.as_ref(), context, name).await?;
            info.add(&node);
        }
        Ok(info)
    }

    async fn task_info_by_id(&self, context: &Context, id: &str) -> Result<TaskInfo> {
        let storages = self.list_storages(context).await?;
        let mut info = TaskInfo::default();
        for storage in storages {
            let node = storage.task_info_by_id(context, id).await?;
            info.add(&node);
        }
        Ok(info)
    }

    async fn list_of_nodes(&self, _: &Context) -> Result<HashMap<String, Vec<String>>> {
        self.load_nodes().await
    }
}
