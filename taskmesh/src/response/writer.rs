//! The sink through which an executing task emits its outputs.
use std::sync::Arc;
use std::sync::Weak;

use anyhow::Result;
use serde::Serialize;

use taskmesh_context::Context;

use crate::error::combine_errors;
use crate::error::MuxGone;
use crate::error::NoPublisherMatched;
use crate::error::RepeatUnsupported;
use crate::Event;
use crate::Promise;
use crate::Publisher;
use crate::TaskMux;

/// Where a writer sends the events written to it.
pub(crate) enum Route {
    /// Dispatch back into the owning mux, fully in-process.
    Proxy,

    /// Publish to a transport stream.
    Stream(Publisher),

    /// No multistream publisher matched the incoming event; writes fail.
    NoMatch,

    /// Invoke a callback per event.
    Handler {
        callback: Arc<dyn Fn(Event) -> Result<()> + Send + Sync>,
        allow_repeat: bool,
    },
}

struct WriterInner {
    context: Context,
    event: Option<Event>,
    promise: Option<Arc<Promise>>,
    mux: Weak<TaskMux>,
    route: Route,
}

/// Sink for the outputs of an executing task.
///
/// Each write links the output to its predecessor event (advancing the done
/// list and send counters) and routes it to the next hop: back into the mux
/// for proxy writers or out to a transport publisher for stream writers.
#[derive(Clone)]
pub struct ResponseWriter {
    inner: Arc<WriterInner>,
}

impl ResponseWriter {
    /// Writer borrowed by the mux for one dispatch.
    pub(crate) fn borrowed(
        context: &Context,
        mux: &Arc<TaskMux>,
        promise: &Arc<Promise>,
        event: &Event,
        route: Route,
    ) -> ResponseWriter {
        ResponseWriter {
            inner: Arc::new(WriterInner {
                context: context.clone(),
                event: Some(event.clone()),
                promise: Some(Arc::clone(promise)),
                mux: Arc::downgrade(mux),
                route,
            }),
        }
    }

    /// Writer invoking a callback for every event written to it.
    pub fn handler<F>(callback: F) -> ResponseWriter
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        ResponseWriter {
            inner: Arc::new(WriterInner {
                context: Context::discard(),
                event: None,
                promise: None,
                mux: Weak::new(),
                route: Route::Handler {
                    callback: Arc::new(callback),
                    allow_repeat: true,
                },
            }),
        }
    }

    /// Writer collecting events written between pipeline stages.
    ///
    /// Plain values are wrapped as payloads of the base event; repeats are
    /// not supported.
    pub fn collector<F>(base: Event, callback: F) -> ResponseWriter
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        ResponseWriter {
            inner: Arc::new(WriterInner {
                context: Context::discard(),
                event: Some(base),
                promise: None,
                mux: Weak::new(),
                route: Route::Handler {
                    callback: Arc::new(callback),
                    allow_repeat: false,
                },
            }),
        }
    }

    /// Emit one output value, wrapped as a payload of the predecessor event.
    pub async fn write_response<T: Serialize>(&self, value: &T) -> Result<()> {
        let event = match &self.inner.event {
            Some(prev) => prev.with_payload(value)?,
            None => Event::with_value("", value)?,
        };
        self.write(event, false).await
    }

    /// Emit one output event.
    pub async fn write_event(&self, event: Event) -> Result<()> {
        self.write(event, false).await
    }

    /// Resubmit an output value under the current event's own name.
    pub async fn repeat_with_response<T: Serialize>(&self, value: &T) -> Result<()> {
        let event = match &self.inner.event {
            Some(prev) => prev.with_payload(value)?,
            None => Event::with_value("", value)?,
        };
        self.write(event, true).await
    }

    /// Resubmit an output event under the current event's own name.
    pub async fn repeat_event(&self, event: Event) -> Result<()> {
        self.write(event, true).await
    }

    /// Return the writer to its factory pool.
    pub fn release(&self) -> Result<()> {
        Ok(())
    }

    async fn write(&self, event: Event, repeat: bool) -> Result<()> {
        let promise = match &self.inner.promise {
            Some(promise) => promise,
            // Handler style writers route values as they come, with no
            // promise graph to link through.
            None => {
                if repeat && !self.allows_repeat() {
                    anyhow::bail!(RepeatUnsupported);
                }
                return self.route(event).await;
            }
        };
        let prev = self
            .inner
            .event
            .as_ref()
            .expect("borrowed writers always carry the predecessor event");

        if repeat {
            let event = if promise.event_name().is_empty() {
                event
            } else {
                event.with_name(promise.event_name())
            };
            return self.route(event.repeat(prev)).await;
        }

        let mux = self.inner.mux.upgrade().ok_or(MuxGone)?;
        let targets = promise.resolve_targets(&mux);
        if targets.is_empty() {
            let event = if event.is_complete() {
                event.with_name("")
            } else {
                event
            };
            return self.route(event.after(prev)).await;
        }
        let mut errors = Vec::new();
        for target in &targets {
            let next = if event.is_complete() {
                event.with_name(target)
            } else {
                event.clone()
            };
            if let Err(error) = self.route(next.after(prev)).await {
                errors.push(error);
            }
        }
        combine_errors(errors)
    }

    async fn route(&self, event: Event) -> Result<()> {
        match &self.inner.route {
            Route::Proxy => {
                let mux = self.inner.mux.upgrade().ok_or(MuxGone)?;
                mux.execute_event(event).await
            }
            Route::Stream(publisher) => {
                publisher
                    .publish(&self.inner.context, std::slice::from_ref(&event))
                    .await
            }
            Route::NoMatch => anyhow::bail!(NoPublisherMatched::new(event.name())),
            Route::Handler { callback, .. } => callback(event),
        }
    }

    fn allows_repeat(&self) -> bool {
        match &self.inner.route {
            Route::Handler { allow_repeat, .. } => *allow_repeat,
            _ => true,
        }
    }
}
