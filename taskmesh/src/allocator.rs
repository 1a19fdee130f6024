//! Event allocation with a bounded reuse pool.
use std::sync::Mutex;

use anyhow::Result;

use crate::Event;
use crate::Message;

const POOL_LIMIT: usize = 128;

/// Decode transport messages into [`Event`]s, reusing released events.
///
/// Released events are cleared and kept on a bounded free list so steady-state
/// dispatch does not allocate a fresh event per message.
#[derive(Default)]
pub struct EventAllocator {
    pool: Mutex<Vec<Event>>,
}

impl EventAllocator {
    pub fn new() -> EventAllocator {
        EventAllocator::default()
    }

    /// Decode a message body into an event.
    pub fn decode(&self, message: &dyn Message) -> Result<Event> {
        let mut event = {
            let mut pool = self.pool.lock().expect("event pool lock poisoned");
            pool.pop().unwrap_or_default()
        };
        match event.decode_from(message.body()) {
            Ok(()) => Ok(event),
            Err(error) => {
                self.release(event);
                Err(error)
            }
        }
    }

    /// Return an event to the pool.
    pub fn release(&self, mut event: Event) {
        event.clear();
        let mut pool = self.pool.lock().expect("event pool lock poisoned");
        if pool.len() < POOL_LIMIT {
            pool.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use taskmesh_context::Context;

    use super::EventAllocator;
    use crate::Event;
    use crate::LocalMessage;

    #[test]
    fn decode_and_release() {
        let context = Context::fixture();
        let allocator = EventAllocator::new();
        let event = Event::with_value("count", &1).unwrap();
        let message = LocalMessage::from_event(&context, &event).unwrap();
        let decoded = allocator.decode(&message).unwrap();
        assert_eq!(decoded.name(), "count");
        allocator.release(decoded);
        // The released event is reused for the next decode.
        let decoded = allocator.decode(&message).unwrap();
        assert_eq!(decoded.id(), event.id());
    }

    #[test]
    fn decode_failure_reports_error() {
        let context = Context::fixture();
        let allocator = EventAllocator::new();
        let message = LocalMessage::new(&context, b"not json".to_vec());
        assert!(allocator.decode(&message).is_err());
    }
}
