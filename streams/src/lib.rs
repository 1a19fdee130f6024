//! Transport construction and fan-in glue for the taskmesh engine.
//!
//! The engine only demands the `Subscriber`/`Publisher` contracts; this crate
//! provides the pieces that connect them to running processes: a URL-scheme
//! registry to build subscribers from connection strings, an in-memory channel
//! transport, a fan-in proxy over several subscribers and the listen-and-serve
//! entrypoint wiring a mux to its sources.
mod interval;
mod memory;
mod proxy;
mod registry;
mod serve;

pub use self::interval::IntervalSubscriber;
pub use self::memory::MemoryStream;
pub use self::proxy::ProxySubscriber;
pub use self::registry::SchemeRegistry;
pub use self::registry::SubscriberFactory;
pub use self::registry::SCHEME_CHAN;
pub use self::registry::SCHEME_GOCHAN;
pub use self::registry::SCHEME_KAFKA;
pub use self::registry::SCHEME_NATS;
pub use self::registry::SCHEME_REDIS;
pub use self::serve::listen_and_serve;
pub use self::serve::Source;

/// The URL scheme has no registered subscriber factory.
#[derive(Debug, thiserror::Error)]
#[error("unsupported subscriber scheme '{0}'")]
pub struct UnsupportedScheme(String);

impl UnsupportedScheme {
    /// Report a connection URL with no registered factory.
    pub fn new<S: Into<String>>(scheme: S) -> UnsupportedScheme {
        UnsupportedScheme(scheme.into())
    }
}
