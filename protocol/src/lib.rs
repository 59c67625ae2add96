/*!
Wire types exchanged between a browser peer and the signaling server over a single
websocket: the tagged [Envelope] and the payloads carried by each [EventKind].
*/

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

pub mod envelope;
pub mod payload;

pub use envelope::{CodecError, Envelope};
pub use payload::{ErrorReport, IceCandidate, SdpType, SessionDescription};

/// Event tags understood by the signaling server.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventKind {
    /// Remote session description proposed by the browser
    Offer,
    /// Local session description produced in reply to an offer
    Answer,
    /// Trickled ICE candidate, in either direction
    Candidate,
    /// Failure report sent by the server, never required by the peer
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Offer => "offer",
            EventKind::Answer => "answer",
            EventKind::Candidate => "candidate",
            EventKind::Error => "error",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tag is outside the known vocabulary.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(EventKind::Offer),
            "answer" => Ok(EventKind::Answer),
            "candidate" => Ok(EventKind::Candidate),
            "error" => Ok(EventKind::Error),
            other => Err(UnknownEvent(other.to_owned())),
        }
    }
}
