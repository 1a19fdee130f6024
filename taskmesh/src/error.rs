//! Errors reported by the dispatch engine.
use anyhow::Error;

/// A task is already registered for the event name.
#[derive(Debug, thiserror::Error)]
#[error("channel '{0}' has been taken")]
pub struct ChannelTaken(String);

impl ChannelTaken {
    /// Report the given event name is already handled.
    pub fn new<S: Into<String>>(name: S) -> ChannelTaken {
        ChannelTaken(name.into())
    }
}

/// Attempted to materialise a message from an empty value.
#[derive(Debug, thiserror::Error)]
#[error("the message value is nil")]
pub struct NullMessage;

/// The event body received from a transport could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("malformed event body: {0}")]
pub struct DecodeFailure(String);

impl DecodeFailure {
    /// Report an undecodable event body.
    pub fn new<S: Into<String>>(reason: S) -> DecodeFailure {
        DecodeFailure(reason.into())
    }
}

/// A task panicked while executing an event.
#[derive(Debug, thiserror::Error)]
#[error("task panicked: {0}")]
pub struct TaskPanic(String);

impl TaskPanic {
    /// Report a recovered task panic.
    pub fn new<S: Into<String>>(info: S) -> TaskPanic {
        TaskPanic(info.into())
    }
}

/// Virtual promises are placeholders for events produced elsewhere and
/// cannot execute tasks or extend chains.
#[derive(Debug, thiserror::Error)]
#[error("promise for '{0}' is virtual and cannot be extended")]
pub struct VirtualPromise(String);

impl VirtualPromise {
    /// Report an operation not supported by a virtual promise.
    pub fn new<S: Into<String>>(name: S) -> VirtualPromise {
        VirtualPromise(name.into())
    }
}

/// No multistream publisher matched the event name.
#[derive(Debug, thiserror::Error)]
#[error("no publisher matched event '{0}'")]
pub struct NoPublisherMatched(String);

impl NoPublisherMatched {
    /// Report a write with no matching publisher.
    pub fn new<S: Into<String>>(name: S) -> NoPublisherMatched {
        NoPublisherMatched(name.into())
    }
}

/// Only one default (unconditional) publisher can be registered.
#[derive(Debug, thiserror::Error)]
#[error("only one default publisher is supported")]
pub struct MultipleDefaultPublishers;

/// The response writer does not support event repeats.
#[derive(Debug, thiserror::Error)]
#[error("response repeat unsupported by this writer")]
pub struct RepeatUnsupported;

/// The dispatch engine the writer routes into was dropped.
#[derive(Debug, thiserror::Error)]
#[error("the task mux behind this writer is gone")]
pub struct MuxGone;

/// Collapse a list of errors into none, the only one, or a combined error.
pub(crate) fn combine_errors(mut errors: Vec<Error>) -> Result<(), Error> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => {
            let combined = errors
                .iter()
                .map(|error| format!("- {:#}", error))
                .collect::<Vec<_>>()
                .join("\n");
            Err(anyhow::anyhow!(combined))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::combine_errors;
    use super::ChannelTaken;

    #[test]
    fn combine_empty() {
        assert!(combine_errors(Vec::new()).is_ok());
    }

    #[test]
    fn combine_keeps_single_error_type() {
        let error = combine_errors(vec![ChannelTaken::new("count").into()]).unwrap_err();
        assert!(error.is::<ChannelTaken>());
    }

    #[test]
    fn combine_joins_messages() {
        let error = combine_errors(vec![
            ChannelTaken::new("count").into(),
            ChannelTaken::new("fetch").into(),
        ])
        .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("'count'"));
        assert!(message.contains("'fetch'"));
    }
}
