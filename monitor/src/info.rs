//! Application and task records shared through the monitoring store.
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use taskmesh_errors::is_skip_message;

/// Description of one process participating in an application cluster.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// Application name shared by every process in the cluster.
    pub name: String,

    /// Host (usually the IP address) the process runs on.
    pub host: String,

    /// Human readable host name.
    pub hostname: String,

    /// Time the process registered itself.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub inited_at: Option<OffsetDateTime>,

    /// Task graph of the process: event name to the list of target event names.
    #[serde(default)]
    pub tasks: HashMap<String, Vec<String>>,

    /// Hosts seen in the cluster and the time each one registered.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub servers: HashMap<String, OffsetDateTime>,
}

impl ApplicationInfo {
    /// Fold another process record into this cluster-wide aggregate.
    ///
    /// The merged record remembers the other host under `servers` and
    /// union-merges the task graph, deep-copying target lists per key.
    pub fn merge(&mut self, info: &ApplicationInfo) {
        self.name = info.name.clone();
        if let Some(inited_at) = info.inited_at {
            self.servers.insert(info.host.clone(), inited_at);
        }
        for (task, targets) in &info.tasks {
            self.tasks.insert(task.clone(), targets.clone());
        }
    }
}

/// Aggregated execution counters and timings for one task.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub total_count: u64,

    #[serde(default)]
    pub error_count: u64,

    #[serde(default)]
    pub success_count: u64,

    #[serde(default)]
    pub skip_count: u64,

    #[serde(default, with = "duration_nanos")]
    pub min_exec_time: Duration,

    #[serde(default, with = "duration_nanos")]
    pub avg_exec_time: Duration,

    #[serde(default, with = "duration_nanos")]
    pub max_exec_time: Duration,

    /// Names of the tasks an event chain completed, for per-ID records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_names: Vec<String>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl TaskInfo {
    /// Account one execution result.
    ///
    /// Errors carrying the skip sentinel count as skips, everything else as an
    /// error; executions without an error count as successes. Timings update
    /// the min/max bounds and a rolling average weighted by the current total.
    pub fn inc(&mut self, error: Option<&str>, exec_time: Duration) {
        self.total_count += 1;
        match error {
            None => self.success_count += 1,
            Some(message) if is_skip_message(message) => self.skip_count += 1,
            Some(_) => self.error_count += 1,
        }
        if self.min_exec_time.is_zero() || self.min_exec_time > exec_time {
            self.min_exec_time = exec_time;
        }
        if self.max_exec_time.is_zero() || self.max_exec_time < exec_time {
            self.max_exec_time = exec_time;
        }
        if self.avg_exec_time.is_zero() {
            self.avg_exec_time = exec_time;
        } else {
            let avg = self.avg_exec_time.as_nanos() as u64;
            let total = self.total_count;
            let avg = (avg * total + exec_time.as_nanos() as u64) / (total + 1);
            self.avg_exec_time = Duration::from_nanos(avg);
        }
        self.touch();
    }

    /// Fold another record into this one (cluster-wide aggregation).
    pub fn add(&mut self, info: &TaskInfo) {
        if !info.is_inited() {
            return;
        }
        let self_total = self.total_count;
        self.total_count += info.total_count;
        self.error_count += info.error_count;
        self.success_count += info.success_count;
        self.skip_count += info.skip_count;
        if self.min_exec_time.is_zero() || self.min_exec_time > info.min_exec_time {
            self.min_exec_time = info.min_exec_time;
        }
        if self.max_exec_time.is_zero() || self.max_exec_time < info.max_exec_time {
            self.max_exec_time = info.max_exec_time;
        }
        if self_total > 0 && info.total_count > 0 {
            let merged = self.avg_exec_time.as_nanos() as u64 * self_total
                + info.avg_exec_time.as_nanos() as u64 * info.total_count;
            self.avg_exec_time = Duration::from_nanos(merged / (self_total + info.total_count));
        } else if info.total_count > 0 {
            self.avg_exec_time = info.avg_exec_time;
        }
        for name in &info.task_names {
            self.add_task_name(name);
        }
        self.touch();
    }

    /// Remember a task name in the per-ID chain record, once.
    pub fn add_task_name(&mut self, name: &str) {
        if self.task_names.iter().any(|known| known == name) {
            return;
        }
        self.task_names.push(name.to_string());
        self.touch();
    }

    /// A record is inited once it accounted at least one update.
    pub fn is_inited(&self) -> bool {
        self.created_at.is_some()
    }

    fn touch(&mut self) {
        let now = OffsetDateTime::now_utc();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// Serialize [`Duration`]s as integer nanoseconds, the format counters are
/// stored with in the key-value schema.
mod duration_nanos {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
