//! Transport subscriber contract feeding messages into the dispatch engine.
use std::sync::Arc;

use anyhow::Result;

use taskmesh_context::Context;

use crate::Message;

/// Operations implemented by message handlers attached to subscribers.
#[async_trait::async_trait]
pub trait ReceiverBackend: Send + Sync {
    /// Process one message received from the stream.
    async fn receive(&self, message: &dyn Message) -> Result<()>;
}

/// Handler processing messages received from a stream.
#[derive(Clone)]
pub struct Receiver(Arc<dyn ReceiverBackend>);

impl Receiver {
    /// Process one message received from the stream.
    pub async fn receive(&self, message: &dyn Message) -> Result<()> {
        self.0.receive(message).await
    }
}

impl<T> From<T> for Receiver
where
    T: ReceiverBackend + 'static,
{
    fn from(value: T) -> Self {
        Receiver(Arc::new(value))
    }
}

/// Subscription to an event stream.
///
/// This is the only subscribe-side surface the engine needs from transports.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// Attach a receiver to the stream.
    async fn subscribe(&self, context: &Context, receiver: Receiver) -> Result<()>;

    /// Block processing the stream until it ends or the subscriber is closed.
    async fn listen(&self, context: &Context) -> Result<()>;

    /// Stop the stream and release its resources.
    async fn close(&self) -> Result<()>;
}
