//! Monitor-facing projection of a dispatched event.
use time::OffsetDateTime;
use uuid::Uuid;

/// Minimal event attributes tracked by metric stores.
///
/// The dispatch engine converts its in-flight events into this record before
/// handing them to [`MetricUpdater`](crate::MetricUpdater) implementations so
/// stores never depend on the engine itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskEvent {
    /// ID of the event chain, when one is known.
    pub id: Option<Uuid>,

    /// Name of the event the execution was routed by.
    pub name: String,

    /// Error the receive or execution finished with, if any.
    pub error: Option<String>,

    /// Time the event was generated.
    pub created_at: OffsetDateTime,
}

impl TaskEvent {
    /// Record for an event that was dispatched to a task.
    pub fn new<S: Into<String>>(id: Uuid, name: S, error: Option<String>) -> TaskEvent {
        TaskEvent {
            id: Some(id),
            name: name.into(),
            error,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Synthetic record for a failure with no decoded event attached (for example
    /// a message body that could not be decoded).
    pub fn error_event<S: Into<String>>(error: S) -> TaskEvent {
        TaskEvent {
            id: None,
            name: String::new(),
            error: Some(error.into()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Same record accounted under a different task name.
    ///
    /// Used to fold failover executions under their dedicated task literal.
    pub fn with_name<S: Into<String>>(&self, name: S) -> TaskEvent {
        let mut event = self.clone();
        event.name = name.into();
        event
    }

    /// True when the record tracks a failed receive or execution.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
