//! [PeerEngine] backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use rtc_signal_protocol::{IceCandidate, SessionDescription};
use serde_json::Value;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::engine::{
    EngineConfig, EngineError, EngineFactory, LocalCandidateHandler, PeerEngine, TrackHandler,
    TrackKind,
};

/// The wire types and the `webrtc` types share the same JSON shape, so values cross the
/// boundary through serde without being touched.
fn convert<T, U>(value: &T) -> Result<U, EngineError>
where
    T: serde::Serialize,
    U: serde::de::DeserializeOwned,
{
    let value: Value = serde_json::to_value(value)?;
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn rtc_configuration(config: &EngineConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn build_api() -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RtcEngineFactory;

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create(&self, config: &EngineConfig) -> Result<Box<dyn PeerEngine>, EngineError> {
        let api = build_api()?;
        let pc = api.new_peer_connection(rtc_configuration(config)).await?;
        Ok(Box::new(RtcEngine { pc: Arc::new(pc) }))
    }
}

pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerEngine for RtcEngine {
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let description: RTCSessionDescription = convert(&description)?;
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await?;
        convert(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let description: RTCSessionDescription = convert(&description)?;
        self.pc.set_local_description(description).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let candidate: RTCIceCandidateInit = convert(&candidate)?;
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(candidate) => {
                        let local = candidate
                            .to_json()
                            .map_err(EngineError::from)
                            .and_then(|init| convert::<_, IceCandidate>(&init));
                        match local {
                            Ok(local) => handler(Some(local)),
                            Err(e) => warn!("dropping local candidate: {}", e),
                        }
                    }
                    None => handler(None),
                }
                Box::pin(async {})
            }));
    }

    fn on_track(&self, handler: TrackHandler) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    RTPCodecType::Unspecified => TrackKind::Unspecified,
                };
                debug!("remote {} track received", kind);
                handler(kind);
                Box::pin(async {})
            },
        ));
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await?;
        Ok(())
    }
}
