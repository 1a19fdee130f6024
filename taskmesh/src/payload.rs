//! Opaque payload container carried by events.
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload bytes attached to an event.
///
/// Values are stored in their JSON encoded form so payloads survive transport
/// hops without knowing the concrete type; raw byte payloads pass through
/// untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Payload {
    bytes: Vec<u8>,
}

impl Payload {
    /// Payload with no content.
    pub fn empty() -> Payload {
        Payload::default()
    }

    /// Encode a value into a payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Payload> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Payload { bytes })
    }

    /// Payload over raw bytes, stored as-is.
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Payload {
        Payload {
            bytes: bytes.into(),
        }
    }

    /// Decode the payload into a structured target.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::from_slice(&self.bytes)?;
        Ok(value)
    }

    /// Raw payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
