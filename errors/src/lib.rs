//! Common errors shared between the taskmesh dispatch engine and the monitor layer.

/// Sentinel raised when an event exceeded its repeat cap and must be skipped.
///
/// Metric stores classify executions that fail with this sentinel as skips,
/// tracked separately from genuine errors.
#[derive(Debug, thiserror::Error)]
#[error("skip event")]
pub struct SkipEvent;

/// Sentinel returned on empty reads from a key-value store.
#[derive(Debug, thiserror::Error)]
#[error("nil response")]
pub struct NilResponse;

/// Message attached to events that carry the skip sentinel.
pub const SKIP_EVENT_MESSAGE: &str = "skip event";

/// Check if a recorded error message carries the skip sentinel.
///
/// Events cross process boundaries with their error reduced to a string so the
/// check falls back to message matching when the typed sentinel is not available.
pub fn is_skip_message(message: &str) -> bool {
    message.contains(SKIP_EVENT_MESSAGE)
}

/// Render an optional error into the string form events are encoded with.
pub fn error_string<E: std::fmt::Display>(error: Option<&E>) -> Option<String> {
    error.map(|error| error.to_string()).filter(|msg| !msg.is_empty())
}

#[cfg(test)]
mod tests {
    use super::error_string;
    use super::is_skip_message;
    use super::SkipEvent;

    #[test]
    fn error_conversion() {
        assert_eq!(error_string(Some(&SkipEvent)).as_deref(), Some("skip event"));
        assert_eq!(error_string::<SkipEvent>(None), None);
    }

    #[test]
    fn skip_detection() {
        assert!(is_skip_message("skip event"));
        assert!(is_skip_message("retranslate cap exceeded: skip event"));
        assert!(!is_skip_message("connection reset"));
    }
}
