//! Counter chain over the in-memory transport and key-value monitor.
//!
//! An interval source submits an increasing counter every second; the chain
//! counts, reports and hands off to a `next-count` stage, while execution
//! metrics accumulate in an in-memory key-value store under the schema a
//! shared store would use.
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use slog::Drain;

use taskmesh::task_fn;
use taskmesh::Cluster;
use taskmesh::Event;
use taskmesh::ResponseWriter;
use taskmesh::Subscriber;
use taskmesh::TaskMux;
use taskmesh_context::Context;
use taskmesh_monitor::kvstorage::ClusterReader;
use taskmesh_monitor::kvstorage::Storage;
use taskmesh_monitor::memory::MemoryKv;
use taskmesh_streams::listen_and_serve;
use taskmesh_streams::IntervalSubscriber;
use taskmesh_streams::SchemeRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, slog::o!("app" => "counter"));
    let context = Context::new(logger);

    let kv = MemoryKv::new();
    let storage = Storage::new(Arc::new(kv.clone())).with_task_detail(Duration::from_secs(60));
    let reader = ClusterReader::new(Arc::new(kv), ["counter"]);
    let cluster = Cluster::builder("counter")
        .reader(reader)
        .store(storage)
        .build()?;

    let mut builder = TaskMux::builder().cluster(cluster);
    builder
        .handle(
            "count",
            task_fn(|context, event: Event, writer: ResponseWriter| async move {
                let value: u64 = event.decode_payload()?;
                slog::info!(context.logger, "Counting"; "value" => value);
                writer.write_response(&(value + 1)).await
            }),
        )?
        .then(task_fn(
            |context, event: Event, writer: ResponseWriter| async move {
                let value: u64 = event.decode_payload()?;
                slog::info!(context.logger, "Counted"; "value" => value);
                writer.write_response(&value).await
            },
        ))?;
    // Executed right after the "count" chain, as a named join point.
    builder.handle(
        "count>next-count",
        task_fn(|context, event: Event, _| async move {
            let value: u64 = event.decode_payload()?;
            slog::info!(context.logger, "Next"; "value" => value);
            Ok(())
        }),
    )?;
    let mux = builder.build(context.clone()).await?;

    let iterator = Arc::new(AtomicU64::new(0));
    let ticks = IntervalSubscriber::new(Duration::from_secs(1), move || {
        let value = iterator.fetch_add(1, Ordering::SeqCst);
        Event::with_value("count", &value)
    });

    let registry = SchemeRegistry::with_defaults();
    let source = Arc::new(ticks) as Arc<dyn Subscriber>;
    listen_and_serve(&context, &registry, &mux, vec![source.into()]).await
}
