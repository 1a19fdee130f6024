//! The task execution contract and handler adapters.
use std::future::Future;
use std::marker::PhantomData;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use taskmesh_context::Context;

use crate::Event;
use crate::ResponseWriter;

/// A single execution unit dispatched by the mux.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    /// Process an event, emitting outputs through the response writer.
    async fn execute(&self, context: &Context, event: Event, writer: ResponseWriter)
        -> Result<()>;

    /// Release resources held by the task when its mux closes.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapt a plain async closure into a [`Task`].
pub fn task_fn<F, Fut>(handler: F) -> FnTask<F, Fut>
where
    F: Fn(Context, Event, ResponseWriter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    FnTask {
        handler,
        _future: PhantomData,
    }
}

/// [`Task`] implementation over a plain async closure.
pub struct FnTask<F, Fut> {
    handler: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait::async_trait]
impl<F, Fut> Task for FnTask<F, Fut>
where
    F: Fn(Context, Event, ResponseWriter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn execute(
        &self,
        context: &Context,
        event: Event,
        writer: ResponseWriter,
    ) -> Result<()> {
        (self.handler)(context.clone(), event, writer).await
    }
}

/// Adapt a closure over a decoded payload into a [`Task`].
///
/// The event payload is decoded into a fresh `In` value before the handler
/// runs; a `Some(Out)` return value is forwarded through the response writer
/// and errors short-circuit. The parameter and return roles are fixed here at
/// registration, so dispatch walks no descriptors at runtime.
pub fn typed_task<In, Out, F, Fut>(handler: F) -> TypedTask<In, Out, F, Fut>
where
    In: DeserializeOwned + Send,
    Out: Serialize + Send + Sync,
    F: Fn(Context, In, ResponseWriter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Out>>> + Send,
{
    TypedTask {
        handler,
        _roles: PhantomData,
    }
}

/// [`Task`] implementation decoding payloads into typed handler input.
pub struct TypedTask<In, Out, F, Fut> {
    handler: F,
    _roles: PhantomData<fn(In) -> (Out, Fut)>,
}

#[async_trait::async_trait]
impl<In, Out, F, Fut> Task for TypedTask<In, Out, F, Fut>
where
    In: DeserializeOwned + Send,
    Out: Serialize + Send + Sync,
    F: Fn(Context, In, ResponseWriter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Out>>> + Send,
{
    async fn execute(
        &self,
        context: &Context,
        event: Event,
        writer: ResponseWriter,
    ) -> Result<()> {
        let input: In = event.decode_payload()?;
        match (self.handler)(context.clone(), input, writer.clone()).await? {
            Some(output) => writer.write_response(&output).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde::Deserialize;
    use serde::Serialize;

    use taskmesh_context::Context;

    use super::typed_task;
    use super::Task;
    use crate::Event;
    use crate::ResponseWriter;

    #[derive(Clone, Debug, Deserialize, Serialize)]
    struct Item {
        text: String,
    }

    #[tokio::test]
    async fn typed_task_decodes_input() {
        let context = Context::fixture();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_task = Arc::clone(&seen);
        let task = typed_task(move |_, item: Item, _| {
            let seen = Arc::clone(&seen_task);
            async move {
                *seen.lock().unwrap() = item.text;
                Ok(None::<Item>)
            }
        });

        let event = Event::with_value("test1", &Item { text: "test1".into() }).unwrap();
        let writer = ResponseWriter::handler(|_| Ok(()));
        task.execute(&context, event, writer).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), "test1");
    }

    #[tokio::test]
    async fn typed_task_forwards_output() {
        let context = Context::fixture();
        let written = Arc::new(Mutex::new(Vec::new()));
        let written_writer = Arc::clone(&written);
        let task = typed_task(move |_, item: Item, _| async move { Ok(Some(item)) });
        let writer = ResponseWriter::handler(move |event| {
            written_writer.lock().unwrap().push(event);
            Ok(())
        });

        let event = Event::with_value("test2", &Item { text: "test2".into() }).unwrap();
        task.execute(&context, event, writer).await.unwrap();
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let item: Item = written[0].decode_payload().unwrap();
        assert_eq!(item.text, "test2");
    }

    #[tokio::test]
    async fn typed_task_rejects_bad_payload() {
        let context = Context::fixture();
        let task = typed_task(move |_, item: Item, _| async move { Ok(Some(item)) });
        let event = Event::with_value("test3", &42).unwrap();
        let writer = ResponseWriter::handler(|_| Ok(()));
        assert!(task.execute(&context, event, writer).await.is_err());
    }
}
