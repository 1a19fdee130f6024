//! Response writers route task outputs to their next hop.
mod factory;
mod writer;

pub use self::factory::MultistreamBuilder;
pub use self::factory::MultistreamResponseFactory;
pub use self::factory::ProxyResponseFactory;
pub use self::factory::ResponseWriterFactory;
pub use self::factory::StreamResponseFactory;
pub use self::writer::ResponseWriter;
