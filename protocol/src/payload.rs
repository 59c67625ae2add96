/*!
Payloads carried in the `data` member of an [Envelope](crate::Envelope).

Field names and member order follow the browser's `RTCSessionDescriptionInit` and
`RTCIceCandidateInit` dictionaries, so a peer can pass them straight to its
`RTCPeerConnection`.
 */

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Payload of `offer` and `answer` events. The SDP text is never inspected here.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Payload of `candidate` events.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

/// Payload of `error` events: which inbound event failed, and why.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct ErrorReport {
    pub event: Option<String>,
    pub message: String,
}
