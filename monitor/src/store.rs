//! Operations implemented by monitoring stores.
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;

use taskmesh_context::Context;

use crate::ApplicationInfo;
use crate::TaskEvent;
use crate::TaskInfo;

/// Record registrations and execution metrics for one process.
#[async_trait::async_trait]
pub trait MetricUpdater: Send + Sync {
    /// Persist the process application record.
    async fn register_application(&self, context: &Context, info: &ApplicationInfo) -> Result<()>;

    /// Remove the process application record.
    async fn deregister_application(&self, context: &Context) -> Result<()>;

    /// Account a message received from a transport, before dispatch.
    async fn receive_event(&self, context: &Context, event: &TaskEvent) -> Result<()>;

    /// Account the execution of a task for an event.
    async fn execute_task(
        &self,
        context: &Context,
        event: &TaskEvent,
        exec_time: Duration,
    ) -> Result<()>;

    /// Account the execution of the failover task for an unmapped event.
    async fn execute_failover_task(
        &self,
        context: &Context,
        event: &TaskEvent,
        exec_time: Duration,
    ) -> Result<()>;
}

/// Read metrics recorded by this process.
#[async_trait::async_trait]
pub trait MetricReader: Send + Sync {
    /// The application record this store was registered with.
    async fn application_info(&self, context: &Context) -> Result<Option<ApplicationInfo>>;

    /// Count of messages received from transports.
    async fn receive_count(&self, context: &Context) -> Result<u64>;

    /// Aggregated information about one task.
    async fn task_info(&self, context: &Context, name: &str) -> Result<TaskInfo>;

    /// Aggregated information about failover executions.
    async fn failover_task_info(&self, context: &Context) -> Result<TaskInfo>;
}

/// Read the cluster-wide aggregate built from every registered process.
#[async_trait::async_trait]
pub trait ClusterInfoReader: Send + Sync {
    /// Cluster-wide application record, merged across hosts.
    async fn application_info(&self, context: &Context) -> Result<ApplicationInfo>;

    /// Task information aggregated across hosts.
    async fn task_info(&self, context: &Context, name: &str) -> Result<TaskInfo>;

    /// Per event-ID task information aggregated across hosts.
    async fn task_info_by_id(&self, context: &Context, id: &str) -> Result<TaskInfo>;

    /// Registered hosts grouped by application name.
    async fn list_of_nodes(&self, context: &Context) -> Result<HashMap<String, Vec<String>>>;
}
