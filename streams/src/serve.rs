//! Wire a mux to its transport sources and process messages until they end.
use std::sync::Arc;

use anyhow::Result;

use taskmesh::Subscriber;
use taskmesh::TaskMux;
use taskmesh_context::Context;

use crate::ProxySubscriber;
use crate::SchemeRegistry;

/// A message source for [`listen_and_serve`]: a connection URL resolved
/// through the registry, or an already constructed subscriber.
pub enum Source {
    Url(String),
    Subscriber(Arc<dyn Subscriber>),
}

impl From<&str> for Source {
    fn from(url: &str) -> Source {
        Source::Url(url.to_string())
    }
}

impl From<String> for Source {
    fn from(url: String) -> Source {
        Source::Url(url)
    }
}

impl From<Arc<dyn Subscriber>> for Source {
    fn from(subscriber: Arc<dyn Subscriber>) -> Source {
        Source::Subscriber(subscriber)
    }
}

/// Subscribe the mux to every source and process messages until all sources
/// end or the proxy subscriber is closed.
pub async fn listen_and_serve(
    context: &Context,
    registry: &SchemeRegistry,
    mux: &Arc<TaskMux>,
    sources: Vec<Source>,
) -> Result<()> {
    let mut subscribers = Vec::with_capacity(sources.len());
    for source in sources {
        let subscriber = match source {
            Source::Url(url) => registry.subscriber_from_url(context, &url).await?,
            Source::Subscriber(subscriber) => subscriber,
        };
        subscribers.push(subscriber);
    }
    let proxy = ProxySubscriber::new(subscribers);
    proxy.subscribe(context, mux.receiver()).await?;
    let listened = proxy.listen(context).await;
    if let Err(error) = proxy.close().await {
        slog::warn!(context.logger, "Failed to close subscribers"; "error" => %error);
    }
    listened
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use taskmesh::task_fn;
    use taskmesh::Event;
    use taskmesh::Subscriber;
    use taskmesh::TaskMux;
    use taskmesh_context::Context;

    use super::listen_and_serve;
    use crate::MemoryStream;
    use crate::SchemeRegistry;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatches_stream_messages_into_the_mux() {
        let context = Context::fixture();
        let stream = MemoryStream::with_capacity(10);

        let handled = Arc::new(AtomicU32::new(0));
        let handled_task = Arc::clone(&handled);
        let mut builder = TaskMux::builder();
        builder
            .handle(
                "count",
                task_fn(move |_, _, _| {
                    let handled = Arc::clone(&handled_task);
                    async move {
                        handled.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        let mux = builder.build(context.clone()).await.unwrap();

        stream
            .publisher()
            .publish(&context, &[Event::with_value("count", &1).unwrap()])
            .await
            .unwrap();

        let serve = {
            let context = context.clone();
            let registry = SchemeRegistry::new();
            let mux = Arc::clone(&mux);
            let stream = stream.clone();
            tokio::spawn(async move {
                let source = Arc::new(stream) as Arc<dyn Subscriber>;
                listen_and_serve(&context, &registry, &mux, vec![source.into()]).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.close().await.unwrap();
        serve.await.unwrap().unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }
}
