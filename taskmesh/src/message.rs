//! Transport message contract consumed by the dispatch engine.
use anyhow::Result;
use serde::Serialize;

use taskmesh_context::Context;

use crate::error::NullMessage;
use crate::Event;

/// Envelope received from a transport subscriber.
///
/// This is the only receive-side surface the engine needs from transports.
#[async_trait::async_trait]
pub trait Message: Send + Sync {
    /// Transport dependent message ID, possibly empty.
    fn id(&self) -> &str;

    /// Context the message was received under.
    fn context(&self) -> &Context;

    /// Message body bytes.
    fn body(&self) -> &[u8];

    /// Acknowledge the message was processed.
    async fn ack(&self) -> Result<()>;
}

/// In-process message, used to submit events without a transport.
#[derive(Debug)]
pub struct LocalMessage {
    body: Vec<u8>,
    context: Context,
}

impl LocalMessage {
    /// Message over raw body bytes.
    pub fn new<B: Into<Vec<u8>>>(context: &Context, body: B) -> LocalMessage {
        LocalMessage {
            body: body.into(),
            context: context.clone(),
        }
    }

    /// Message carrying an encoded event.
    pub fn from_event(context: &Context, event: &Event) -> Result<LocalMessage> {
        let body = event.encode()?;
        Ok(LocalMessage::new(context, body))
    }

    /// Message carrying an encoded value.
    ///
    /// Values that encode to nothing (for example a JSON `null`) are rejected
    /// with [`NullMessage`](crate::error::NullMessage).
    pub fn from_value<T: Serialize>(context: &Context, value: &T) -> Result<LocalMessage> {
        let body = serde_json::to_vec(value)?;
        if body.is_empty() || body == b"null" {
            anyhow::bail!(NullMessage);
        }
        Ok(LocalMessage::new(context, body))
    }
}

#[async_trait::async_trait]
impl Message for LocalMessage {
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
    use taskmesh_context::Context;

    use super::LocalMessage;
    use super::Message;
    use crate::error::NullMessage;
    use crate::Event;

    #[tokio::test]
    async fn carries_encoded_events() {
        let context = Context::fixture();
        let event = Event::with_value("count", &7).unwrap();
        let message = LocalMessage::from_event(&context, &event).unwrap();
        assert_eq!(message.id(), "");
        let decoded = Event::decode(message.body()).unwrap();
        assert_eq!(decoded.id(), event.id());
        message.ack().await.unwrap();
    }

    #[test]
    fn rejects_null_values() {
        let context = Context::fixture();
        let error = LocalMessage::from_value(&context, &()).unwrap_err();
        assert!(error.is::<NullMessage>());
    }
}
