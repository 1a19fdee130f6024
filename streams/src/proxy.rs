//! Fan-in over multiple subscribers behind a single subscriber contract.
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;

use taskmesh::Receiver;
use taskmesh::Subscriber;
use taskmesh_context::Context;

/// Multiplex several subscribers as one.
///
/// Subscriptions are forwarded to every child; `listen` runs every child
/// concurrently and returns once all of them do.
pub struct ProxySubscriber {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl ProxySubscriber {
    /// Wrap the given subscribers; a single child is returned unwrapped.
    pub fn new(mut subscribers: Vec<Arc<dyn Subscriber>>) -> Arc<dyn Subscriber> {
        match subscribers.len() {
            1 => subscribers.remove(0),
            _ => Arc::new(ProxySubscriber { subscribers }),
        }
    }
}

#[async_trait::async_trait]
impl Subscriber for ProxySubscriber {
    async fn subscribe(&self, context: &Context, receiver: Receiver) -> Result<()> {
        for subscriber in &self.subscribers {
            subscriber.subscribe(context, receiver.clone()).await?;
        }
        Ok(())
    }

    async fn listen(&self, context: &Context) -> Result<()> {
        let listeners = self.subscribers.iter().map(|subscriber| {
            let subscriber = Arc::clone(subscriber);
            let context = context.clone();
            tokio::spawn(async move { subscriber.listen(&context).await })
        });
        let mut errors = Vec::new();
        for joined in join_all(listeners).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => errors.push(error),
                Err(join_error) => errors.push(join_error.into()),
            }
        }
        match errors.len() {
            0 => Ok(()),
            _ => Err(errors.remove(0)),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        for subscriber in &self.subscribers {
            if let Err(error) = subscriber.close().await {
                errors.push(error);
            }
        }
        match errors.len() {
            0 => Ok(()),
            _ => Err(errors.remove(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;

    use taskmesh::Event;
    use taskmesh::Message;
    use taskmesh::Receiver;
    use taskmesh::ReceiverBackend;
    use taskmesh::Subscriber;
    use taskmesh_context::Context;

    use super::ProxySubscriber;
    use crate::MemoryStream;

    struct CollectingReceiver {
        names: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ReceiverBackend for CollectingReceiver {
        async fn receive(&self, message: &dyn Message) -> Result<()> {
            let event = Event::decode(message.body())?;
            self.names.lock().unwrap().push(event.name().to_string());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fans_in_multiple_streams() {
        let context = Context::fixture();
        let first = MemoryStream::with_capacity(10);
        let second = MemoryStream::with_capacity(10);
        let proxy = ProxySubscriber::new(vec![
            Arc::new(first.clone()) as Arc<dyn Subscriber>,
            Arc::new(second.clone()) as Arc<dyn Subscriber>,
        ]);

        let names = Arc::new(Mutex::new(Vec::new()));
        let receiver = Receiver::from(CollectingReceiver {
            names: Arc::clone(&names),
        });
        proxy.subscribe(&context, receiver).await.unwrap();

        first
            .publisher()
            .publish(&context, &[Event::with_value("one", &1).unwrap()])
            .await
            .unwrap();
        second
            .publisher()
            .publish(&context, &[Event::with_value("two", &2).unwrap()])
            .await
            .unwrap();

        let listener = {
            let proxy = Arc::clone(&proxy);
            let context = context.clone();
            tokio::spawn(async move { proxy.listen(&context).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        proxy.close().await.unwrap();
        listener.await.unwrap().unwrap();

        let mut names = names.lock().unwrap().clone();
        names.sort();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn single_child_returned_unwrapped() {
        let stream = MemoryStream::new();
        let proxy = ProxySubscriber::new(vec![Arc::new(stream) as Arc<dyn Subscriber>]);
        // A single child skips the proxy layer entirely.
        proxy.close().await.unwrap();
    }
}
