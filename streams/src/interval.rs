//! Periodic event source, useful to drive chains without an external stream.
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use taskmesh::Event;
use taskmesh::Message;
use taskmesh::Receiver;
use taskmesh::Subscriber;
use taskmesh_context::Context;

/// Subscriber emitting a generated event on a fixed interval.
///
/// Every tick the generator callback builds the next event, which is encoded
/// and delivered to every subscribed receiver like any transport message.
pub struct IntervalSubscriber {
    interval: Duration,
    generator: Box<dyn Fn() -> Result<Event> + Send + Sync>,
    receivers: RwLock<Vec<Receiver>>,
    closed: watch::Sender<bool>,
}

impl IntervalSubscriber {
    /// Emit the generator's event every `interval`.
    pub fn new<F>(interval: Duration, generator: F) -> IntervalSubscriber
    where
        F: Fn() -> Result<Event> + Send + Sync + 'static,
    {
        let (closed, _) = watch::channel(false);
        IntervalSubscriber {
            interval,
            generator: Box::new(generator),
            receivers: RwLock::new(Vec::new()),
            closed,
        }
    }
}

#[async_trait::async_trait]
impl Subscriber for IntervalSubscriber {
    async fn subscribe(&self, _: &Context, receiver: Receiver) -> Result<()> {
        self.receivers
            .write()
            .expect("receiver list lock poisoned")
            .push(receiver);
        Ok(())
    }

    async fn listen(&self, context: &Context) -> Result<()> {
        let mut closed = self.closed.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            if *closed.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = closed.changed() => {
                    if changed.is_err() || *closed.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let event = match (self.generator)() {
                Ok(event) => event,
                Err(error) => {
                    slog::warn!(
                        context.logger, "Interval generator failed to build an event";
                        "error" => %error,
                    );
                    continue;
                }
            };
            let message = IntervalMessage {
                body: event.encode()?,
                context: context.clone(),
            };
            let receivers = self
                .receivers
                .read()
                .expect("receiver list lock poisoned")
                .clone();
            for receiver in receivers {
                if let Err(error) = receiver.receive(&message).await {
                    slog::warn!(
                        context.logger, "Receiver failed to process interval event";
                        "error" => %error,
                    );
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _ = self.closed.send(true);
        Ok(())
    }
}

struct IntervalMessage {
    body: Vec<u8>,
    context: Context,
}

#[async_trait::async_trait]
impl Message for IntervalMessage {
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
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;

    use taskmesh::Event;
    use taskmesh::Message;
    use taskmesh::Receiver;
    use taskmesh::ReceiverBackend;
    use taskmesh::Subscriber;
    use taskmesh_context::Context;

    use super::IntervalSubscriber;

    struct CountingReceiver {
        count: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl ReceiverBackend for CountingReceiver {
        async fn receive(&self, message: &dyn Message) -> Result<()> {
            let event = Event::decode(message.body())?;
            assert_eq!(event.name(), "tick");
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn emits_generated_events() {
        let context = Context::fixture();
        let subscriber = Arc::new(IntervalSubscriber::new(Duration::from_millis(10), || {
            Event::with_value("tick", &1)
        }));

        let count = Arc::new(AtomicU32::new(0));
        let receiver = Receiver::from(CountingReceiver {
            count: Arc::clone(&count),
        });
        subscriber.subscribe(&context, receiver).await.unwrap();

        let listener = {
            let subscriber = Arc::clone(&subscriber);
            let context = context.clone();
            tokio::spawn(async move { subscriber.listen(&context).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        subscriber.close().await.unwrap();
        listener.await.unwrap().unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
