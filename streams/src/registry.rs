//! Build subscribers from connection URLs through an explicit scheme registry.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as AnyContext;
use anyhow::Result;
use url::Url;

use taskmesh::Subscriber;
use taskmesh_context::Context;

use crate::MemoryStream;
use crate::UnsupportedScheme;

/// In-memory channel transport scheme.
pub const SCHEME_CHAN: &str = "chan";

/// Alias of [`SCHEME_CHAN`].
pub const SCHEME_GOCHAN: &str = "gochan";

/// Redis streams transport scheme, served by an externally registered driver.
pub const SCHEME_REDIS: &str = "redis";

/// NATS transport scheme, served by an externally registered driver.
pub const SCHEME_NATS: &str = "nats";

/// Kafka transport scheme, served by an externally registered driver.
pub const SCHEME_KAFKA: &str = "kafka";

/// Construct a subscriber from a connection URL.
#[async_trait::async_trait]
pub trait SubscriberFactory: Send + Sync {
    /// Establish a new connection to the stream behind the URL.
    async fn subscriber(&self, context: &Context, url: &str) -> Result<Arc<dyn Subscriber>>;
}

/// Explicit URL-scheme to subscriber-factory registry.
///
/// The registry is an owned object rather than process-global state: every
/// process builds the registry it wants, registers the transport drivers it
/// links and hands it to [`listen_and_serve`](crate::listen_and_serve).
#[derive(Default)]
pub struct SchemeRegistry {
    factories: HashMap<String, Arc<dyn SubscriberFactory>>,
}

impl SchemeRegistry {
    /// Registry with no factories.
    pub fn new() -> SchemeRegistry {
        SchemeRegistry::default()
    }

    /// Registry with the in-memory transport registered under `chan` and
    /// `gochan`, both sharing one stream per registry.
    pub fn with_defaults() -> SchemeRegistry {
        let mut registry = SchemeRegistry::new();
        let shared = MemoryStream::new();
        let factory = Arc::new(MemoryFactory { shared });
        registry.register_factory(SCHEME_CHAN, Arc::clone(&factory) as Arc<dyn SubscriberFactory>);
        registry.register_factory(SCHEME_GOCHAN, factory);
        registry
    }

    /// Register a factory for a URL scheme, replacing any previous one.
    pub fn register<F>(&mut self, scheme: &str, factory: F) -> &mut Self
    where
        F: SubscriberFactory + 'static,
    {
        self.register_factory(scheme, Arc::new(factory))
    }

    fn register_factory(
        &mut self,
        scheme: &str,
        factory: Arc<dyn SubscriberFactory>,
    ) -> &mut Self {
        self.factories.insert(scheme.to_string(), factory);
        self
    }

    /// Build a subscriber for the given connection URL.
    pub async fn subscriber_from_url(
        &self,
        context: &Context,
        connect_url: &str,
    ) -> Result<Arc<dyn Subscriber>> {
        let url = Url::parse(connect_url)
            .with_context(|| format!("invalid connection URL '{}'", connect_url))?;
        let factory = self
            .factories
            .get(url.scheme())
            .ok_or_else(|| UnsupportedScheme::new(url.scheme()))?;
        factory.subscriber(context, connect_url).await
    }
}

struct MemoryFactory {
    shared: MemoryStream,
}

#[async_trait::async_trait]
impl SubscriberFactory for MemoryFactory {
    async fn subscriber(&self, _: &Context, _: &str) -> Result<Arc<dyn Subscriber>> {
        Ok(Arc::new(self.shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use taskmesh_context::Context;

    use super::SchemeRegistry;
    use crate::UnsupportedScheme;

    #[tokio::test]
    async fn defaults_serve_memory_schemes() {
        let context = Context::fixture();
        let registry = SchemeRegistry::with_defaults();
        registry
            .subscriber_from_url(&context, "chan://local")
            .await
            .unwrap();
        registry
            .subscriber_from_url(&context, "gochan://local")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let context = Context::fixture();
        let registry = SchemeRegistry::with_defaults();
        let error = registry
            .subscriber_from_url(&context, "kafka://broker:9092")
            .await
            .err()
            .unwrap();
        assert!(error.is::<UnsupportedScheme>());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let context = Context::fixture();
        let registry = SchemeRegistry::with_defaults();
        assert!(registry
            .subscriber_from_url(&context, "not a url")
            .await
            .is_err());
    }
}
