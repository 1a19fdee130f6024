//! Asynchronous event dispatch engine with chained tasks.
//!
//! Messages received from transport subscribers are decoded into [`Event`]s and
//! dispatched by a [`TaskMux`] to the [`Task`] registered for the event name.
//! Task outputs flow through a [`ResponseWriter`] which links them to their
//! predecessor and routes them either back into the same mux (in-process proxy
//! dispatch) or to a transport [`Publisher`], so one message travels through a
//! multi-stage chain of tasks, possibly across processes.
//!
//! Each process registers its task graph in a shared store through the
//! [`Cluster`] synchroniser, which also aggregates execution metrics so
//! operators see the cluster-wide topology live.
pub mod builtin;
pub mod cluster;
pub mod conf;
pub mod error;
pub mod response;

mod allocator;
mod event;
mod message;
mod mux;
mod payload;
mod pool;
mod promise;
mod publish;
mod subscribe;
mod task;
mod telemetry;


pub use self::allocator::EventAllocator;
pub use self::cluster::Cluster;
pub use self::cluster::ClusterBuilder;
pub use self::event::Event;
pub use self::message::LocalMessage;
pub use self::message::Message;
pub use self::mux::PromiseHandle;
pub use self::mux::TaskMux;
pub use self::mux::TaskMuxBuilder;
pub use self::payload::Payload;
pub use self::pool::AsyncTask;
pub use self::promise::Promise;
pub use self::publish::NamedPublisher;
pub use self::publish::Publisher;
pub use self::publish::PublisherBackend;
pub use self::response::ResponseWriter;
pub use self::response::ResponseWriterFactory;
pub use self::subscribe::Receiver;
pub use self::subscribe::ReceiverBackend;
pub use self::subscribe::Subscriber;
pub use self::task::task_fn;
pub use self::task::typed_task;
pub use self::task::Task;
pub use self::telemetry::register_metrics;
