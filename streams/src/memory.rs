//! In-memory channel transport.
use std::sync::Arc;
use std::sync::RwLock;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;

use taskmesh::Event;
use taskmesh::Message;
use taskmesh::Publisher;
use taskmesh::PublisherBackend;
use taskmesh::Receiver;
use taskmesh::Subscriber;
use taskmesh_context::Context;

const DEFAULT_CAPACITY: usize = 100;

struct MemoryInner {
    sender: mpsc::Sender<Vec<u8>>,
    stream: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    receivers: RwLock<Vec<Receiver>>,
    closed: watch::Sender<bool>,
}

/// In-memory event stream connecting a publisher to subscribed receivers.
///
/// Published events are encoded to their wire form, so in-memory delivery
/// exercises the same codec path as a real transport. Acknowledgement is a
/// no-op: the channel forgets a message once it is delivered.
#[derive(Clone)]
pub struct MemoryStream {
    inner: Arc<MemoryInner>,
}

impl MemoryStream {
    /// Stream with the default channel capacity.
    pub fn new() -> MemoryStream {
        MemoryStream::with_capacity(DEFAULT_CAPACITY)
    }

    /// Stream buffering up to `capacity` undelivered messages.
    pub fn with_capacity(capacity: usize) -> MemoryStream {
        let (sender, stream) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        MemoryStream {
            inner: Arc::new(MemoryInner {
                sender,
                stream: Mutex::new(Some(stream)),
                receivers: RwLock::new(Vec::new()),
                closed,
            }),
        }
    }

    /// Publisher emitting into this stream.
    pub fn publisher(&self) -> Publisher {
        Publisher::from(MemoryPublisher {
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        MemoryStream::new()
    }
}

#[async_trait::async_trait]
impl Subscriber for MemoryStream {
    async fn subscribe(&self, _: &Context, receiver: Receiver) -> Result<()> {
        self.inner
            .receivers
            .write()
            .expect("receiver list lock poisoned")
            .push(receiver);
        Ok(())
    }

    async fn listen(&self, context: &Context) -> Result<()> {
        let mut stream = self
            .inner
            .stream
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("memory stream is already being listened to"))?;
        let mut closed = self.inner.closed.subscribe();
        loop {
            if *closed.borrow() {
                break;
            }
            let body = tokio::select! {
                body = stream.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
                changed = closed.changed() => {
                    if changed.is_err() || *closed.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let message = MemoryMessage {
                body,
                context: context.clone(),
            };
            let receivers = self
                .inner
                .receivers
                .read()
                .expect("receiver list lock poisoned")
                .clone();
            for receiver in receivers {
                if let Err(error) = receiver.receive(&message).await {
                    slog::warn!(
                        context.logger, "Receiver failed to process stream message";
                        "error" => %error,
                    );
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _ = self.inner.closed.send(true);
        Ok(())
    }
}

struct MemoryPublisher {
    inner: Arc<MemoryInner>,
}

#[async_trait::async_trait]
impl PublisherBackend for MemoryPublisher {
    async fn publish(&self, _: &Context, events: &[Event]) -> Result<()> {
        for event in events {
            let body = event.encode()?;
            self.inner.sender.send(body).await?;
        }
        Ok(())
    }
}

struct MemoryMessage {
    body: Vec<u8>,
    context: Context,
}

#[async_trait::async_trait]
impl Message for MemoryMessage {
    fn id(&self) -> &str {
        ""
    }

    fn context(&self) -> &Context {
        &self.context
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) -> Result<()> {
        Ok(())
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

    use super::MemoryStream;

    struct CollectingReceiver {
        names: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ReceiverBackend for CollectingReceiver {
        async fn receive(&self, message: &dyn Message) -> Result<()> {
            let event = Event::decode(message.body())?;
            self.names.lock().unwrap().push(event.name().to_string());
            message.ack().await
        }
    }

    #[tokio::test]
    async fn delivers_published_events() {
        let context = Context::fixture();
        let stream = MemoryStream::with_capacity(10);
        let names = Arc::new(Mutex::new(Vec::new()));
        let receiver = Receiver::from(CollectingReceiver {
            names: Arc::clone(&names),
        });
        stream.subscribe(&context, receiver).await.unwrap();

        let publisher = stream.publisher();
        let events = [
            Event::with_value("count", &1).unwrap(),
            Event::with_value("fetch", &2).unwrap(),
        ];
        publisher.publish(&context, &events).await.unwrap();

        let listener = {
            let stream = stream.clone();
            let context = context.clone();
            tokio::spawn(async move { stream.listen(&context).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.close().await.unwrap();
        listener.await.unwrap().unwrap();

        assert_eq!(*names.lock().unwrap(), vec!["count", "fetch"]);
    }

    #[tokio::test]
    async fn second_listener_is_rejected() {
        let context = Context::fixture();
        let stream = MemoryStream::new();
        stream.close().await.unwrap();
        stream.listen(&context).await.unwrap();
        assert!(stream.listen(&context).await.is_err());
    }
}
