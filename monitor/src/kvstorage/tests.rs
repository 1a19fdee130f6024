use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use taskmesh_context::Context;

use super::ClusterReader;
use super::KeyValue;
use super::Storage;
use super::FAILOVER_TASK_NAME;
use crate::memory::MemoryKv;
use crate::ApplicationInfo;
use crate::ClusterInfoReader;
use crate::MetricReader;
use crate::MetricUpdater;
use crate::TaskEvent;

fn app_info(host: &str) -> ApplicationInfo {
    let mut info = ApplicationInfo {
        name: "counter".into(),
        host: host.into(),
        hostname: format!("node-{}", host),
        inited_at: Some(time::OffsetDateTime::now_utc()),
        ..ApplicationInfo::default()
    };
    info.tasks.insert("count".into(), vec!["count.1".into()]);
    info
}

#[tokio::test]
async fn execution_updates_schema_keys() {
    let context = Context::fixture();
    let kv = MemoryKv::new();
    let storage = Storage::new(Arc::new(kv.clone()));
    storage
        .register_application(&context, &app_info("10.0.0.1"))
        .await
        .unwrap();

    let event = TaskEvent::new(Uuid::new_v4(), "count", None);
    storage
        .execute_task(&context, &event, Duration::from_millis(10))
        .await
        .unwrap();
    let failed = TaskEvent::new(Uuid::new_v4(), "count", Some("boom".into()));
    storage
        .execute_task(&context, &failed, Duration::from_millis(30))
        .await
        .unwrap();
    let skipped = TaskEvent::new(Uuid::new_v4(), "count", Some("skip event".into()));
    storage
        .execute_task(&context, &skipped, Duration::from_millis(20))
        .await
        .unwrap();

    let prefix = "counter:metric_10.0.0.1_$_count";
    assert_eq!(kv.get(&format!("{}_total", prefix)).await.unwrap(), "3");
    assert_eq!(kv.get(&format!("{}_error", prefix)).await.unwrap(), "1");
    assert_eq!(kv.get(&format!("{}_skip", prefix)).await.unwrap(), "1");
    let min: u64 = kv.get(&format!("{}_min", prefix)).await.unwrap().parse().unwrap();
    let max: u64 = kv.get(&format!("{}_max", prefix)).await.unwrap().parse().unwrap();
    assert_eq!(min, Duration::from_millis(10).as_nanos() as u64);
    assert_eq!(max, Duration::from_millis(30).as_nanos() as u64);

    let info = MetricReader::task_info(&storage, &context, "count").await.unwrap();
    assert_eq!(info.total_count, 3);
    assert_eq!(info.success_count, 1);
}

#[tokio::test]
async fn failover_executions_fold_under_literal() {
    let context = Context::fixture();
    let kv = MemoryKv::new();
    let storage = Storage::new(Arc::new(kv.clone()));
    storage
        .register_application(&context, &app_info("10.0.0.1"))
        .await
        .unwrap();

    let event = TaskEvent::new(Uuid::new_v4(), "unmapped", None);
    storage
        .execute_failover_task(&context, &event, Duration::from_millis(5))
        .await
        .unwrap();

    let key = format!("counter:metric_10.0.0.1_$_{}_total", FAILOVER_TASK_NAME);
    assert_eq!(kv.get(&key).await.unwrap(), "1");
    let info = storage.failover_task_info(&context).await.unwrap();
    assert_eq!(info.total_count, 1);
}

#[tokio::test]
async fn per_id_detail_records_expire() {
    let context = Context::fixture();
    let kv = MemoryKv::new();
    let storage =
        Storage::new(Arc::new(kv.clone())).with_task_detail(Duration::from_millis(20));
    storage
        .register_application(&context, &app_info("10.0.0.1"))
        .await
        .unwrap();

    let id = Uuid::new_v4();
    let event = TaskEvent::new(id, "count", None);
    storage
        .execute_task(&context, &event, Duration::from_millis(1))
        .await
        .unwrap();

    let info = storage.task_info_by_id(&context, &id.to_string()).await.unwrap();
    assert_eq!(info.total_count, 1);
    assert_eq!(info.task_names, vec!["count"]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let info = storage.task_info_by_id(&context, &id.to_string()).await.unwrap();
    assert_eq!(info.total_count, 0);
}

#[tokio::test]
async fn receive_counters() {
    let context = Context::fixture();
    let kv = MemoryKv::new();
    let storage = Storage::new(Arc::new(kv.clone()));
    storage
        .register_application(&context, &app_info("10.0.0.1"))
        .await
        .unwrap();

    let event = TaskEvent::new(Uuid::new_v4(), "count", None);
    storage.receive_event(&context, &event).await.unwrap();
    storage.receive_event(&context, &event).await.unwrap();
    let broken = TaskEvent::error_event("malformed body");
    storage.receive_event(&context, &broken).await.unwrap();

    assert_eq!(storage.receive_count(&context).await.unwrap(), 2);
    let key = "counter:metric_10.0.0.1_$_receive_error";
    assert_eq!(kv.get(key).await.unwrap(), "1");
}

#[tokio::test]
async fn reader_aggregates_across_hosts() {
    let context = Context::fixture();
    let kv = MemoryKv::new();
    for host in ["10.0.0.1", "10.0.0.2"] {
        let storage = Storage::new(Arc::new(kv.clone()));
        storage
            .register_application(&context, &app_info(host))
            .await
            .unwrap();
        let event = TaskEvent::new(Uuid::new_v4(), "count", None);
        storage
            .execute_task(&context, &event, Duration::from_millis(10))
            .await
            .unwrap();
    }

    let reader = ClusterReader::new(Arc::new(kv), ["counter"]);
    let nodes = reader.list_of_nodes(&context).await.unwrap();
    assert_eq!(nodes["counter"].len(), 2);

    let info = reader.application_info(&context).await.unwrap();
    assert_eq!(info.servers.len(), 2);
    assert_eq!(info.tasks["count"], vec!["count.1".to_string()]);

    let task = reader.task_info(&context, "count").await.unwrap();
    assert_eq!(task.total_count, 2);
}
