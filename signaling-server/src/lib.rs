/*!
Signaling server that lets a browser establish a WebRTC session with a peer running inside
the server.

Each websocket client gets a [session::Session] bound to one engine instance. The browser
sends `offer` and `candidate` envelopes, the server replies with an `answer` and trickles
its own candidates back as the engine discovers them.
*/

use std::fmt::{Display, Formatter};

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod outbound;
pub mod routes;
pub mod rtc_engine;
pub mod session;
pub mod signaling;

/// Process-unique identifier of a connected client, used to tag log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(inner: u64) -> Self {
        ClientId(inner)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}
