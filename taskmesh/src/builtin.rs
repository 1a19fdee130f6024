//! Built-in tasks for forwarding and resubmitting events.
use anyhow::Result;

use taskmesh_context::Context;
use taskmesh_errors::SkipEvent;

use crate::Event;
use crate::Publisher;
use crate::ResponseWriter;
use crate::Task;

/// Default bound on event resubmissions.
pub const DEFAULT_REPEAT_LIMIT: u32 = 30;

/// Forward events verbatim to external streams, with a bounded re-send cap.
///
/// Once an event was retranslated more than `max_repeat` times it is written
/// downstream with the skip sentinel instead of being published again.
pub struct Retranslator {
    max_repeat: u32,
    publishers: Vec<Publisher>,
}

impl Retranslator {
    /// Retranslator over the given publishers; `0` applies the default cap.
    pub fn new(max_repeat: u32, publishers: Vec<Publisher>) -> Retranslator {
        let max_repeat = match max_repeat {
            0 => DEFAULT_REPEAT_LIMIT,
            max_repeat => max_repeat,
        };
        Retranslator {
            max_repeat,
            publishers,
        }
    }
}

#[async_trait::async_trait]
impl Task for Retranslator {
    async fn execute(
        &self,
        context: &Context,
        event: Event,
        writer: ResponseWriter,
    ) -> Result<()> {
        let (_, retranslated) = event.counters();
        if retranslated > self.max_repeat {
            return writer.write_event(event.with_error(SkipEvent)).await;
        }
        for publisher in &self.publishers {
            publisher
                .publish(context, std::slice::from_ref(&event))
                .await?;
        }
        writer.write_event(event).await
    }
}

/// Resubmit the same event into the same dispatch under its own name.
///
/// Intended for self-looping stages that need bounded retries before the
/// chain proceeds.
pub struct Repeater {
    max_repeat: u32,
}

impl Repeater {
    /// Repeater with the given cap; `0` applies the default cap.
    pub fn new(max_repeat: u32) -> Repeater {
        let max_repeat = match max_repeat {
            0 => DEFAULT_REPEAT_LIMIT,
            max_repeat => max_repeat,
        };
        Repeater { max_repeat }
    }
}

#[async_trait::async_trait]
impl Task for Repeater {
    async fn execute(&self, _: &Context, event: Event, writer: ResponseWriter) -> Result<()> {
        if event.name().is_empty() {
            return Ok(());
        }
        let (_, retranslated) = event.counters();
        if retranslated > self.max_repeat {
            return writer.write_event(event.with_error(SkipEvent)).await;
        }
        writer.repeat_event(event).await
    }
}
