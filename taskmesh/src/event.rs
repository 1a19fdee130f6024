//! The unit of work flowing through the dispatch engine.
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::DecodeFailure;
use crate::Payload;

/// An event routed through the task graph.
///
/// Events derive from one another as they travel along a chain: every
/// derivation preserves the chain `id`, while `done_events` and the send
/// counters record the hops already traversed.
#[derive(Clone, Debug)]
pub struct Event {
    id: Uuid,
    name: String,
    payload: Payload,
    error: Option<String>,
    created_at: OffsetDateTime,
    done_events: Vec<String>,
    send_count: u32,
    retranslate_count: u32,
    not_complete: bool,
}

impl Default for Event {
    fn default() -> Event {
        Event {
            id: Uuid::nil(),
            name: String::new(),
            payload: Payload::empty(),
            error: None,
            created_at: OffsetDateTime::now_utc(),
            done_events: Vec::new(),
            send_count: 0,
            retranslate_count: 0,
            not_complete: false,
        }
    }
}

impl Event {
    /// Fresh event carrying a payload under the given name.
    pub fn new<S: Into<String>>(name: S, payload: Payload) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            ..Event::default()
        }
    }

    /// Fresh event carrying an encoded value under the given name.
    pub fn with_value<S: Into<String>, T: Serialize>(name: S, value: &T) -> Result<Event> {
        let payload = Payload::encode(value)?;
        Ok(Event::new(name, payload))
    }

    /// ID of the event chain.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name used to route the event to a task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload carried by the event.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Decode the payload into a structured target.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        self.payload.decode()
    }

    /// Error attached to the event, if any.
    pub fn err(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Time of the most recent derivation.
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Names of the events this chain already traversed, sorted and unique.
    pub fn done_tasks(&self) -> &[String] {
        &self.done_events
    }

    /// Send and retranslate counters, in that order.
    pub fn counters(&self) -> (u32, u32) {
        (self.send_count, self.retranslate_count)
    }

    /// Mark the event as a complete (or partial) result.
    ///
    /// Writers only rename complete events to their target names; a partial
    /// intermediate result keeps the name it was produced under.
    pub fn set_complete(&mut self, complete: bool) {
        self.not_complete = !complete;
    }

    pub fn is_complete(&self) -> bool {
        !self.not_complete
    }

    /// Same chain under a new routing name.
    pub fn with_name<S: Into<String>>(&self, name: S) -> Event {
        let mut event = self.clone();
        event.name = name.into();
        event.created_at = OffsetDateTime::now_utc();
        event
    }

    /// Same chain with a new encoded payload; the attached error is dropped.
    pub fn with_payload<T: Serialize>(&self, value: &T) -> Result<Event> {
        let payload = Payload::encode(value)?;
        Ok(self.with_payload_raw(payload))
    }

    /// Same chain with a new payload; the attached error is dropped.
    pub fn with_payload_raw(&self, payload: Payload) -> Event {
        let mut event = self.clone();
        event.payload = payload;
        event.error = None;
        event.created_at = OffsetDateTime::now_utc();
        event
    }

    /// Same chain with an error attached.
    pub fn with_error<E: std::fmt::Display>(&self, error: E) -> Event {
        let mut event = self.clone();
        event.error = Some(error.to_string());
        event.created_at = OffsetDateTime::now_utc();
        event
    }

    /// Derive the next hop of the chain after `prev` completed.
    ///
    /// The done list becomes `prev.done ∪ {prev.name}` (sorted, unique) and the
    /// send counter advances.
    pub fn after(&self, prev: &Event) -> Event {
        let mut event = self.clone();
        event.done_events = prev.done_events.clone();
        if !prev.name.is_empty() {
            event.push_done(prev.name.clone());
        }
        event.send_count = prev.send_count + 1;
        event.retranslate_count = prev.retranslate_count;
        event.created_at = OffsetDateTime::now_utc();
        event
    }

    /// Derive a resubmission of `prev` under its own name.
    ///
    /// Both counters advance and the done list stays at the predecessor's, so
    /// repeat loops do not mark their own event as traversed.
    pub fn repeat(&self, prev: &Event) -> Event {
        let mut event = self.clone();
        event.done_events = prev.done_events.clone();
        event.send_count = prev.send_count + 1;
        event.retranslate_count = prev.retranslate_count + 1;
        event.created_at = OffsetDateTime::now_utc();
        event
    }

    fn push_done(&mut self, name: String) {
        if let Err(position) = self.done_events.binary_search(&name) {
            self.done_events.insert(position, name);
        }
    }

    /// Encode the event into its self-contained wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = EventWire {
            id: self.id,
            name: self.name.clone(),
            payload: if self.payload.is_empty() {
                None
            } else {
                Some(BASE64.encode(self.payload.bytes()))
            },
            evdone: self.done_events.clone(),
            send_count: self.send_count,
            retranslate_count: self.retranslate_count,
            error: self.error.clone(),
            created_at: self.created_at,
        };
        let data = serde_json::to_vec(&wire)?;
        Ok(data)
    }

    /// Decode an event from its wire form.
    pub fn decode(data: &[u8]) -> Result<Event> {
        let mut event = Event::default();
        event.decode_from(data)?;
        Ok(event)
    }

    /// Decode wire data into this event, replacing its content.
    pub(crate) fn decode_from(&mut self, data: &[u8]) -> Result<()> {
        let wire: EventWire = serde_json::from_slice(data)
            .map_err(|error| DecodeFailure::new(error.to_string()))?;
        let payload = match wire.payload {
            None => Payload::empty(),
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|error| DecodeFailure::new(error.to_string()))?;
                Payload::from_bytes(bytes)
            }
        };
        self.id = wire.id;
        self.name = wire.name;
        self.payload = payload;
        self.error = wire.error.filter(|message| !message.is_empty());
        self.created_at = wire.created_at;
        self.done_events = wire.evdone;
        self.done_events.sort();
        self.done_events.dedup();
        self.send_count = wire.send_count;
        self.retranslate_count = wire.retranslate_count;
        self.not_complete = false;
        Ok(())
    }

    /// Reset the event for reuse by an allocator pool.
    pub(crate) fn clear(&mut self) {
        *self = Event::default();
    }
}

#[derive(Serialize, Deserialize)]
struct EventWire {
    id: Uuid,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    evdone: Vec<String>,
    #[serde(default)]
    send_count: u32,
    #[serde(default)]
    retranslate_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::Event;
    use crate::Payload;

    #[test]
    fn after_collects_done_events() {
        let first = Event::with_value("test1", &100).unwrap();
        let second = Event::with_value("test2", &100).unwrap().after(&first);
        let third = Event::with_value("test3", &100).unwrap().after(&second);
        assert_eq!(third.done_tasks(), ["test1", "test2"]);
        assert_eq!(third.counters(), (2, 0));
    }

    #[test]
    fn after_deduplicates_and_sorts() {
        let mut first = Event::with_value("b", &1).unwrap();
        first = first.after(&Event::with_value("c", &1).unwrap());
        let next = Event::with_value("a", &1).unwrap().after(&first);
        assert_eq!(next.done_tasks(), ["b", "c"]);
        let again = next.with_name("d").after(&next);
        assert_eq!(again.done_tasks(), ["a", "b", "c"]);
    }

    #[test]
    fn completion_flag() {
        let mut event = Event::with_value("test", &100).unwrap();
        assert!(event.is_complete());
        event.set_complete(false);
        assert!(!event.is_complete());
        event.set_complete(true);
        assert!(event.is_complete());
    }

    #[test]
    fn derivations_preserve_id() {
        let event = Event::with_value("test", &100).unwrap();
        let id = event.id();
        assert_eq!(event.with_name("test2").id(), id);
        assert_eq!(event.with_payload(&1).unwrap().id(), id);
        assert_eq!(event.with_error("boom").id(), id);
        assert_eq!(event.after(&event).id(), id);
        assert_eq!(event.repeat(&event).id(), id);
    }

    #[test]
    fn error_attachment() {
        let event = Event::with_value("test", &100).unwrap();
        assert!(event.err().is_none());
        let failed = event.with_error("boom");
        assert_eq!(failed.err(), Some("boom"));
        let recovered = failed.with_payload(&1).unwrap();
        assert!(recovered.err().is_none());
    }

    #[test]
    fn repeat_advances_both_counters() {
        let event = Event::with_value("test", &100).unwrap();
        let repeated = event.repeat(&event);
        assert_eq!(repeated.counters(), (1, 1));
        let twice = repeated.repeat(&repeated);
        assert_eq!(twice.counters(), (2, 2));
        let (send, retranslate) = twice.counters();
        assert!(retranslate <= send);
    }

    #[test]
    fn wire_round_trip() {
        let event = Event::new("fetch", Payload::from_bytes(b"\"body\"".to_vec()))
            .with_error("boom")
            .after(&Event::with_value("list", &1).unwrap());
        let data = event.encode().unwrap();
        let back = Event::decode(&data).unwrap();
        assert_eq!(back.id(), event.id());
        assert_eq!(back.name(), "fetch");
        assert_eq!(back.payload().bytes(), b"\"body\"");
        assert_eq!(back.err(), Some("boom"));
        assert_eq!(back.done_tasks(), ["list"]);
        assert_eq!(back.counters(), (1, 0));
        let delta = (back.created_at() - event.created_at()).abs();
        assert!(delta < time::Duration::milliseconds(1));
    }

    #[test]
    fn wire_omits_empty_fields() {
        let event = Event::new("fetch", Payload::empty());
        let data = event.encode().unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(!text.contains("\"payload\""));
        assert!(!text.contains("\"error\""));
        assert!(!text.contains("\"evdone\""));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let error = Event::decode(b"not json").unwrap_err();
        assert!(error.is::<crate::error::DecodeFailure>());
    }
}
