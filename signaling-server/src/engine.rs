//! What a session needs from the WebRTC stack.
//!
//! The production implementation lives in [crate::rtc_engine]; sessions only see these
//! traits, which keeps the signaling state machine independent of the engine.

use async_trait::async_trait;
use rtc_signal_protocol::{IceCandidate, SessionDescription};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
    #[error("payload conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Kind of an inbound media track.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
    Unspecified,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::Unspecified => "unspecified",
        })
    }
}

/// Called with each locally gathered candidate, then once with `None` when gathering ends.
pub type LocalCandidateHandler = Box<dyn Fn(Option<IceCandidate>) + Send + Sync>;
pub type TrackHandler = Box<dyn Fn(TrackKind) + Send + Sync>;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct EngineConfig {
    pub ice_servers: Vec<IceServer>,
}

/// One peer connection. Handlers may be invoked from engine tasks at any time, concurrently
/// with the other methods.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;
    fn on_local_candidate(&self, handler: LocalCandidateHandler);
    fn on_track(&self, handler: TrackHandler);
    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, config: &EngineConfig) -> Result<Box<dyn PeerEngine>, EngineError>;
}
