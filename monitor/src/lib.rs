//! Cluster monitoring records and storage for the taskmesh dispatch engine.
//!
//! Monitoring is divided in two halves:
//!
//! - Record keeping: every process publishes its application record and per-task
//!   execution counters through a [`MetricUpdater`].
//! - Record reading: operators and the cluster synchroniser read the cluster-wide
//!   aggregate back through a [`ClusterInfoReader`].
//!
//! The objective of these two halves is to abstract away the shared key-value
//! store that carries the cluster view across processes.
pub mod conf;
pub mod kvstorage;
pub mod memory;

mod event;
mod info;
mod store;

pub use self::event::TaskEvent;
pub use self::info::ApplicationInfo;
pub use self::info::TaskInfo;
pub use self::store::ClusterInfoReader;
pub use self::store::MetricReader;
pub use self::store::MetricUpdater;
