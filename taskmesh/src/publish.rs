//! Transport publisher contract used to route task outputs across processes.
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use taskmesh_context::Context;

use crate::Event;

/// Operations implemented by transport publishers.
#[async_trait::async_trait]
pub trait PublisherBackend: Send + Sync {
    /// Publish encoded events to the stream.
    async fn publish(&self, context: &Context, events: &[Event]) -> Result<()>;
}

/// Publish events to the backing transport stream.
#[derive(Clone)]
pub struct Publisher(Arc<dyn PublisherBackend>);

impl Publisher {
    /// Publish events to the stream.
    pub async fn publish(&self, context: &Context, events: &[Event]) -> Result<()> {
        self.0.publish(context, events).await
    }

    /// Publish events and report the chain ID of each one.
    pub async fn publish_and_return_ids(
        &self,
        context: &Context,
        events: &[Event],
    ) -> Result<Vec<Uuid>> {
        let ids = events.iter().map(Event::id).collect();
        self.publish(context, events).await?;
        Ok(ids)
    }

    /// Publisher invoking a callback per event, useful for tests and local sinks.
    pub fn from_fn<F>(callback: F) -> Publisher
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        Publisher(Arc::new(FnPublisher { callback }))
    }
}

impl<T> From<T> for Publisher
where
    T: PublisherBackend + 'static,
{
    fn from(value: T) -> Self {
        Publisher(Arc::new(value))
    }
}

struct FnPublisher<F> {
    callback: F,
}

#[async_trait::async_trait]
impl<F> PublisherBackend for FnPublisher<F>
where
    F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
{
    async fn publish(&self, _: &Context, events: &[Event]) -> Result<()> {
        for event in events {
            (self.callback)(event)?;
        }
        Ok(())
    }
}

/// Publisher wrapper that submits arbitrary values as events with a fixed name.
pub struct NamedPublisher {
    name: String,
    inner: Publisher,
}

impl NamedPublisher {
    pub fn new<S: Into<String>>(name: S, inner: Publisher) -> NamedPublisher {
        NamedPublisher {
            name: name.into(),
            inner,
        }
    }

    /// Wrap each value into an event named after this publisher and emit them,
    /// reporting the generated chain IDs.
    pub async fn publish_values<T: Serialize>(
        &self,
        context: &Context,
        values: &[T],
    ) -> Result<Vec<Uuid>> {
        let mut events = Vec::with_capacity(values.len());
        for value in values {
            events.push(Event::with_value(&self.name, value)?);
        }
        self.inner.publish_and_return_ids(context, &events).await
    }
}

#[async_trait::async_trait]
impl PublisherBackend for NamedPublisher {
    async fn publish(&self, context: &Context, events: &[Event]) -> Result<()> {
        let renamed: Vec<Event> = events
            .iter()
            .map(|event| event.with_name(&self.name))
            .collect();
        self.inner.publish(context, &renamed).await
    }
}
