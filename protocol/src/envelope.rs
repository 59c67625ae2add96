/*!
The tagged message exchanged in both directions: `{"event": <tag>, "data": <value>}`.

Inbound envelopes are decoded in two steps. [Envelope::decode] only checks the outer
shape, so an unknown tag or a bad payload never prevents the envelope from being routed;
[Envelope::payload] then decodes `data` against the schema expected for the tag.
 */

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payload::{ErrorReport, IceCandidate, SessionDescription};
use crate::EventKind;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{event}` envelope: {source}")]
    Encode {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable once built; outbound envelopes are created through the typed constructors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Envelope {
            event: event.into(),
            data,
        }
    }

    fn typed<T: Serialize>(kind: EventKind, data: &T) -> Result<Self, CodecError> {
        let data = serde_json::to_value(data).map_err(|source| CodecError::Encode {
            event: kind.to_string(),
            source,
        })?;
        Ok(Envelope::new(kind.as_str(), data))
    }

    pub fn offer(description: &SessionDescription) -> Result<Self, CodecError> {
        Envelope::typed(EventKind::Offer, description)
    }

    pub fn answer(description: &SessionDescription) -> Result<Self, CodecError> {
        Envelope::typed(EventKind::Answer, description)
    }

    pub fn candidate(candidate: &IceCandidate) -> Result<Self, CodecError> {
        Envelope::typed(EventKind::Candidate, candidate)
    }

    pub fn error(report: &ErrorReport) -> Result<Self, CodecError> {
        Envelope::typed(EventKind::Error, report)
    }

    /// Raw tag, as received.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// `None` for tags outside the known vocabulary.
    pub fn kind(&self) -> Option<EventKind> {
        self.event.parse().ok()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Decode `data` as the payload type expected for this event.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        T::deserialize(&self.data).map_err(|source| CodecError::Payload {
            event: self.event.clone(),
            source,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Envelope)
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|source| CodecError::Encode {
            event: self.event.clone(),
            source,
        })
    }
}
