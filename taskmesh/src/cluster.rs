//! Synchronise the process task graph with the rest of the cluster.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use taskmesh_context::Context;
use taskmesh_monitor::ApplicationInfo;
use taskmesh_monitor::ClusterInfoReader;
use taskmesh_monitor::MetricUpdater;
use taskmesh_monitor::TaskEvent;

use crate::error::combine_errors;
use crate::Event;

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Incrementally configure a [`Cluster`] synchroniser.
pub struct ClusterBuilder {
    app_name: String,
    host: Option<String>,
    hostname: Option<String>,
    sync_interval: Duration,
    reader: Option<Arc<dyn ClusterInfoReader>>,
    stores: Vec<Arc<dyn MetricUpdater>>,
}

impl ClusterBuilder {
    /// Override the host address this process registers under.
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Override the hostname this process registers under.
    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Interval between reloads of the cluster-wide task graph.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.sync_interval = interval;
        }
        self
    }

    /// Reader the sync loop refreshes the cluster view from.
    pub fn reader<R>(mut self, reader: R) -> Self
    where
        R: ClusterInfoReader + 'static,
    {
        self.reader = Some(Arc::new(reader));
        self
    }

    /// Add a store receiving registrations and execution metrics.
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: MetricUpdater + 'static,
    {
        self.stores.push(Arc::new(store));
        self
    }

    /// Finalise the configuration.
    ///
    /// At least one of a reader or a metric store is required for
    /// synchronisation to be meaningful.
    pub fn build(self) -> Result<Cluster> {
        if self.reader.is_none() && self.stores.is_empty() {
            anyhow::bail!("a cluster info reader or a metric store is required");
        }
        let host = match self.host {
            Some(host) => host,
            None => local_ip_address::local_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
        };
        let hostname = match self.hostname {
            Some(hostname) => hostname,
            None => hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let (shutdown, _) = watch::channel(false);
        Ok(Cluster {
            inner: Arc::new(ClusterInner {
                app_name: self.app_name,
                host,
                hostname,
                sync_interval: self.sync_interval,
                reader: self.reader,
                stores: self.stores,
                state: RwLock::new(ClusterState::default()),
                shutdown,
                sync_task: Mutex::new(None),
            }),
        })
    }
}

#[derive(Default)]
struct ClusterState {
    task_map: HashMap<String, Vec<String>>,
    app_info: Option<ApplicationInfo>,
}

struct ClusterInner {
    app_name: String,
    host: String,
    hostname: String,
    sync_interval: Duration,
    reader: Option<Arc<dyn ClusterInfoReader>>,
    stores: Vec<Arc<dyn MetricUpdater>>,
    state: RwLock<ClusterState>,
    shutdown: watch::Sender<bool>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

/// Join the task graphs of several processes into one cross-service map.
///
/// Registration publishes this process's [`ApplicationInfo`] to every
/// configured store; a background loop periodically reloads the cluster-wide
/// aggregate so target resolution sees successors registered by other
/// processes.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Start configuring a cluster for the given application name.
    pub fn builder<S: Into<String>>(app_name: S) -> ClusterBuilder {
        ClusterBuilder {
            app_name: app_name.into(),
            host: None,
            hostname: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            reader: None,
            stores: Vec::new(),
        }
    }

    /// Register this process in every store and start the sync loop.
    pub async fn register_application(
        &self,
        context: &Context,
        tasks: HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let info = ApplicationInfo {
            name: self.inner.app_name.clone(),
            host: self.inner.host.clone(),
            hostname: self.inner.hostname.clone(),
            inited_at: Some(time::OffsetDateTime::now_utc()),
            tasks,
            servers: HashMap::new(),
        };
        let mut errors = Vec::new();
        for store in &self.inner.stores {
            if let Err(error) = store.register_application(context, &info).await {
                errors.push(error);
            }
        }
        self.start_sync(context);
        combine_errors(errors)
    }

    /// Deregister from every store and stop the sync loop.
    pub async fn unregister_application(&self, context: &Context) -> Result<()> {
        let mut errors = Vec::new();
        for store in &self.inner.stores {
            if let Err(error) = store.deregister_application(context).await {
                errors.push(error);
            }
        }
        self.stop_sync();
        combine_errors(errors)
    }

    /// Report a message receipt (or receive failure) to every store.
    pub async fn receive_event(
        &self,
        context: &Context,
        event: Option<&Event>,
        error: Option<&anyhow::Error>,
    ) -> Result<()> {
        let record = task_event(event, error);
        let mut errors = Vec::new();
        for store in &self.inner.stores {
            if let Err(error) = store.receive_event(context, &record).await {
                errors.push(error);
            }
        }
        combine_errors(errors)
    }

    /// Report a task execution to every store.
    pub async fn exec_event(
        &self,
        context: &Context,
        failover: bool,
        event: Option<&Event>,
        exec_time: Duration,
        error: Option<&anyhow::Error>,
    ) -> Result<()> {
        let record = task_event(event, error);
        let mut errors = Vec::new();
        for store in &self.inner.stores {
            let update = if failover {
                store.execute_failover_task(context, &record, exec_time).await
            } else {
                store.execute_task(context, &record, exec_time).await
            };
            if let Err(error) = update {
                errors.push(error);
            }
        }
        combine_errors(errors)
    }

    /// Cluster-known successors of an event name.
    pub fn target_events_after(&self, event_name: &str) -> Vec<String> {
        let state = self.inner.state.read().expect("cluster state lock poisoned");
        state
            .task_map
            .get(event_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every event name and its direct successors, cluster-wide.
    pub fn all_tasks(&self) -> HashMap<String, Vec<String>> {
        let state = self.inner.state.read().expect("cluster state lock poisoned");
        state
            .app_info
            .as_ref()
            .map(|info| info.tasks.clone())
            .unwrap_or_default()
    }

    /// Transitive closure of the task graph: chain heads mapped to every
    /// event their chains reach, with consumed intermediates removed.
    pub fn all_task_chains(&self) -> HashMap<String, Vec<String>> {
        let mut chains = self.all_tasks();
        let mut progress = true;
        'outer: while progress && !chains.is_empty() {
            let keys: Vec<String> = chains.keys().cloned().collect();
            for key in keys {
                let targets = match chains.get(&key) {
                    Some(targets) => targets.clone(),
                    None => continue,
                };
                progress = false;
                let mut extended = targets.clone();
                for target in &targets {
                    if target == &key {
                        continue;
                    }
                    if let Some(sub) = chains.remove(target) {
                        if !sub.is_empty() {
                            extended.extend(sub);
                            progress = true;
                        }
                    }
                }
                chains.insert(key, extended);
                if progress {
                    continue 'outer;
                }
            }
        }
        chains
    }

    /// Reload the cluster-wide aggregate once.
    pub async fn sync_info(&self, context: &Context) -> Result<()> {
        let reader = match &self.inner.reader {
            Some(reader) => reader,
            None => return Ok(()),
        };
        let info = reader.application_info(context).await?;
        let mut merged = ApplicationInfo::default();
        merged.merge(&info);
        let mut state = self.inner.state.write().expect("cluster state lock poisoned");
        state.task_map = merged
            .tasks
            .iter()
            .map(|(task, targets)| (task.clone(), targets.clone()))
            .collect();
        state.app_info = Some(merged);
        Ok(())
    }

    fn start_sync(&self, context: &Context) {
        if self.inner.reader.is_none() {
            return;
        }
        self.stop_sync();
        let cluster = self.clone();
        let context = context.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cluster.inner.sync_interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = cluster.sync_info(&context).await {
                            slog::warn!(
                                context.logger, "Failed to refresh cluster task graph";
                                "error" => %error,
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self
            .inner
            .sync_task
            .lock()
            .expect("cluster sync handle lock poisoned") = Some(handle);
    }

    fn stop_sync(&self) {
        let _ = self.inner.shutdown.send(true);
        let handle = self
            .inner
            .sync_task
            .lock()
            .expect("cluster sync handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let _ = self.inner.shutdown.send_replace(false);
    }
}

fn task_event(event: Option<&Event>, error: Option<&anyhow::Error>) -> TaskEvent {
    match event {
        None => TaskEvent::error_event(
            error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        Some(event) => {
            let error = error
                .map(|error| error.to_string())
                .or_else(|| event.err().map(String::from));
            TaskEvent::new(event.id(), event.name(), error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::Cluster;
    use taskmesh_monitor::ApplicationInfo;

    fn cluster_with_tasks(tasks: HashMap<String, Vec<String>>) -> Cluster {
        let cluster = Cluster::builder("test")
            .host("10.0.0.1")
            .hostname("node-1")
            .store(NullStore)
            .build()
            .unwrap();
        let info = ApplicationInfo {
            tasks,
            ..ApplicationInfo::default()
        };
        cluster
            .inner
            .state
            .write()
            .unwrap()
            .app_info = Some(info);
        cluster
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl taskmesh_monitor::MetricUpdater for NullStore {
        async fn register_application(
            &self,
            _: &taskmesh_context::Context,
            _: &ApplicationInfo,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn deregister_application(&self, _: &taskmesh_context::Context) -> anyhow::Result<()> {
            Ok(())
        }

        async fn receive_event(
            &self,
            _: &taskmesh_context::Context,
            _: &taskmesh_monitor::TaskEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn execute_task(
            &self,
            _: &taskmesh_context::Context,
            _: &taskmesh_monitor::TaskEvent,
            _: std::time::Duration,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn execute_failover_task(
            &self,
            _: &taskmesh_context::Context,
            _: &taskmesh_monitor::TaskEvent,
            _: std::time::Duration,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn chains_collapse_to_heads() {
        let mut tasks = HashMap::new();
        tasks.insert("a".to_string(), vec!["a.1".to_string()]);
        tasks.insert("a.1".to_string(), vec!["a.2".to_string()]);
        tasks.insert("a.2".to_string(), Vec::new());
        let cluster = cluster_with_tasks(tasks.clone());

        assert_eq!(cluster.all_tasks(), tasks);
        let mut expected = HashMap::new();
        expected.insert(
            "a".to_string(),
            vec!["a.1".to_string(), "a.2".to_string()],
        );
        assert_eq!(cluster.all_task_chains(), expected);
    }

    #[test]
    fn chains_keep_disjoint_heads() {
        let mut tasks = HashMap::new();
        tasks.insert("a".to_string(), vec!["a.1".to_string()]);
        tasks.insert("a.1".to_string(), Vec::new());
        tasks.insert("b".to_string(), Vec::new());
        let cluster = cluster_with_tasks(tasks);

        let chains = cluster.all_task_chains();
        assert_eq!(chains.get("a"), Some(&vec!["a.1".to_string()]));
        assert_eq!(chains.get("b"), Some(&Vec::new()));
        assert!(!chains.contains_key("a.1"));
    }

    #[test]
    fn target_lookup_uses_synced_map() {
        let cluster = cluster_with_tasks(HashMap::new());
        cluster.inner.state.write().unwrap().task_map.insert(
            "count".to_string(),
            vec!["count.1".to_string()],
        );
        assert_eq!(cluster.target_events_after("count"), vec!["count.1"]);
        assert!(cluster.target_events_after("missing").is_empty());
    }

    #[test]
    fn requires_reader_or_store() {
        assert!(Cluster::builder("test").build().is_err());
    }
}
