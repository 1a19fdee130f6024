//! Dispatch-scoped context carried through the taskmesh engine.
//!
//! Every receive and execute path takes a [`Context`]: the process owns one
//! root context wrapping its logger, and each dispatch narrows that scope
//! with the attributes of the event being worked on. Log lines emitted by a
//! task therefore always identify the event chain they belong to, without
//! the task threading identifiers around by hand.
use slog::Logger;
use slog::OwnedKV;
use slog::SendSyncRefUnwindSafeKV;

/// Scoped container carried through receive and dispatch paths.
///
/// Contexts narrow rather than mutate: [`Context::for_event`] and
/// [`Context::scoped`] return a new context for the tighter scope and leave
/// the original untouched, so a scope ends by simply dropping its context.
#[derive(Clone, Debug)]
pub struct Context {
    /// Logger with the scope attributes attached to it.
    pub logger: Logger,
}

impl Context {
    /// Root context for a process, wrapping its logger.
    pub fn new(logger: Logger) -> Context {
        Context { logger }
    }

    /// Context that logs nowhere.
    ///
    /// Used by writers and tools that run without a dispatch scope.
    pub fn discard() -> Context {
        Context {
            logger: Logger::root(slog::Discard, slog::o!()),
        }
    }

    /// Narrow the scope to the event a dispatch is working on.
    ///
    /// The event chain ID and routing name are attached to every log line
    /// emitted under the returned context.
    pub fn for_event<S1, S2>(&self, event_id: S1, event_name: S2) -> Context
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let event_id = event_id.into();
        let event_name = event_name.into();
        self.scoped(slog::o!(
            "event_id" => event_id,
            "event_name" => event_name,
        ))
    }

    /// Narrow the scope with arbitrary log key/value pairs.
    pub fn scoped<T>(&self, entries: OwnedKV<T>) -> Context
    where
        T: SendSyncRefUnwindSafeKV + 'static,
    {
        Context {
            logger: self.logger.new(entries),
        }
    }
}

#[cfg(any(test, feature = "test-fixture"))]
impl Context {
    /// Create an empty context useful for tests.
    pub fn fixture() -> Context {
        Context::discard()
    }
}
