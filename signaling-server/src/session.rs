use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rtc_signal_protocol::{
    CodecError, Envelope, ErrorReport, EventKind, IceCandidate, SessionDescription,
};
use thiserror::Error;
use tokio::time::timeout;

use crate::engine::{EngineError, PeerEngine, TrackKind};
use crate::outbound::{Outbound, OutboundClosed};
use crate::ClientId;

/// Remote candidates kept while no remote description has been applied yet.
pub const MAX_PENDING_CANDIDATES: usize = 64;

/// Hook invoked for every inbound media track, for downstream media handling.
pub type TrackObserver = Arc<dyn Fn(ClientId, TrackKind) + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    /// Engine created, no description exchanged.
    Idle,
    /// Remote offer applied, local answer not sent yet.
    AnswerPending,
    /// Local answer sent.
    Negotiated,
    Closed,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("negotiation did not finish within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Outbound(#[from] OutboundClosed),
    #[error("session is closed")]
    Closed,
}

/// One client's signaling session: a channel (through [Outbound]) bound to one engine.
pub struct Session {
    id: ClientId,
    state: SessionState,
    engine: Box<dyn PeerEngine>,
    outbound: Outbound,
    negotiation_timeout: Duration,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl Session {
    pub fn new(
        id: ClientId,
        engine: Box<dyn PeerEngine>,
        outbound: Outbound,
        negotiation_timeout: Duration,
    ) -> Self {
        Session {
            id,
            state: SessionState::Idle,
            engine,
            outbound,
            negotiation_timeout,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Route engine events to the client. Local candidates go straight to the outbound
    /// queue whatever the negotiation state is.
    pub fn attach_engine_callbacks(&self, track_observer: Option<TrackObserver>) {
        let id = self.id;
        let outbound = self.outbound.clone();
        self.engine
            .on_local_candidate(Box::new(move |candidate: Option<IceCandidate>| match candidate {
                Some(candidate) => forward_local_candidate(id, &outbound, &candidate),
                None => debug!("ICE gathering complete for {:?}", id),
            }));
        self.engine.on_track(Box::new(move |kind: TrackKind| {
            info!("received track of kind {} from {:?}", kind, id);
            if let Some(observer) = &track_observer {
                observer(id, kind);
            }
        }));
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        match self.state {
            SessionState::Closed => Err(TransitionError::Closed),
            _ => Ok(()),
        }
    }

    /// Apply a remote offer and reply with an answer.
    ///
    /// A second offer renegotiates with the same steps and overwrites both descriptions.
    /// On any failure the state held before the offer is restored, so the client may
    /// simply send a new offer.
    pub async fn accept_offer(&mut self, envelope: &Envelope) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let offer: SessionDescription = envelope.payload()?;
        let previous = self.state;
        if previous != SessionState::Idle {
            info!("renegotiating with {:?} (was {:?})", self.id, previous);
        }

        let limit = self.negotiation_timeout;
        let result = match timeout(limit, self.negotiate(offer)).await {
            Ok(result) => result,
            Err(_) => Err(TransitionError::Timeout(limit)),
        };
        let sent = result.and_then(|answer| {
            self.outbound.send(Envelope::answer(&answer)?)?;
            Ok(())
        });
        match sent {
            Ok(()) => {
                self.state = SessionState::Negotiated;
                debug!("answer sent to {:?}", self.id);
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    async fn negotiate(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransitionError> {
        self.engine.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.state = SessionState::AnswerPending;
        self.flush_pending_candidates().await;

        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Hand a trickled remote candidate to the engine. Candidates that arrive before any
    /// remote description are queued and applied once the offer has been accepted.
    pub async fn add_remote_candidate(
        &mut self,
        envelope: &Envelope,
    ) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let candidate: IceCandidate = envelope.payload()?;
        if !self.remote_description_set {
            if self.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                warn!(
                    "pending candidate queue full for {:?}, dropping {}",
                    self.id, candidate.candidate
                );
            } else {
                debug!("queuing early candidate from {:?}", self.id);
                self.pending_candidates.push(candidate);
            }
            return Ok(());
        }
        self.engine.add_remote_candidate(candidate).await?;
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.engine.add_remote_candidate(candidate).await {
                warn!("failed to apply queued candidate for {:?}: {}", self.id, e);
            }
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Tell the client an inbound message could not be handled.
    pub fn report_error(&self, event: Option<EventKind>, error: &dyn Display) {
        let report = ErrorReport {
            event: event.map(|kind| kind.to_string()),
            message: error.to_string(),
        };
        let sent = Envelope::error(&report)
            .map_err(TransitionError::from)
            .and_then(|envelope| Ok(self.outbound.send(envelope)?));
        if let Err(e) = sent {
            debug!("could not report error to {:?}: {}", self.id, e);
        }
    }

    /// Release the engine, then the channel. Consumes the session, so this runs once.
    pub async fn close(mut self) {
        self.state = SessionState::Closed;
        if let Err(e) = self.engine.close().await {
            error!("failed to close peer connection of {:?}: {}", self.id, e);
        }
        if let Err(e) = self.outbound.close().await {
            error!("failed to close websocket of {:?}: {}", self.id, e);
        }
    }
}

fn forward_local_candidate(id: ClientId, outbound: &Outbound, candidate: &IceCandidate) {
    let sent = Envelope::candidate(candidate)
        .map_err(TransitionError::from)
        .and_then(|envelope| Ok(outbound.send(envelope)?));
    if let Err(e) = sent {
        warn!("failed to send candidate to {:?}: {}", id, e);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::engine::MockPeerEngine;
    use crate::outbound::test::RecordingSink;
    use crate::outbound::Writer;
    use mockall::Sequence;
    use serde_json::json;
    use std::sync::Mutex;

    pub(crate) fn offer_envelope() -> Envelope {
        Envelope::new("offer", json!({"type": "offer", "sdp": "v=0..."}))
    }

    pub(crate) fn candidate_envelope(n: u16) -> Envelope {
        Envelope::new(
            "candidate",
            json!({"candidate": format!("candidate:{n}"), "sdpMid": "0", "sdpMLineIndex": n}),
        )
    }

    pub(crate) fn expect_successful_negotiation(engine: &mut MockPeerEngine, times: usize) {
        engine
            .expect_set_remote_description()
            .times(times)
            .returning(|_| Ok(()));
        engine
            .expect_create_answer()
            .times(times)
            .returning(|| Ok(SessionDescription::answer("v=0 answer")));
        engine
            .expect_set_local_description()
            .times(times)
            .returning(|_| Ok(()));
    }

    pub(crate) fn session_with(engine: MockPeerEngine) -> (Session, RecordingSink, Writer) {
        let sink = RecordingSink::default();
        let (outbound, writer) = Outbound::spawn(ClientId::new(7), sink.clone());
        let session = Session::new(
            ClientId::new(7),
            Box::new(engine),
            outbound,
            Duration::from_secs(5),
        );
        (session, sink, writer)
    }

    async fn finish(session: Session, writer: Writer) {
        session.close().await;
        writer.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_in_idle_sends_answer() {
        let mut engine = MockPeerEngine::new();
        expect_successful_negotiation(&mut engine, 1);
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, sink, writer) = session_with(engine);

        session.accept_offer(&offer_envelope()).await.unwrap();
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind(), Some(EventKind::Answer));
        assert_eq!(
            envelopes[0].data(),
            &json!({"type": "answer", "sdp": "v=0 answer"})
        );
    }

    #[tokio::test]
    async fn test_failed_offer_returns_to_idle_and_can_be_retried() {
        let mut engine = MockPeerEngine::new();
        engine
            .expect_set_remote_description()
            .times(2)
            .returning(|_| Ok(()));
        let mut calls = 0;
        engine.expect_create_answer().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(EngineError::Rejected("answer creation failed".to_owned()))
            } else {
                Ok(SessionDescription::answer("v=0 answer"))
            }
        });
        engine
            .expect_set_local_description()
            .times(1)
            .returning(|_| Ok(()));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, sink, writer) = session_with(engine);

        let error = session.accept_offer(&offer_envelope()).await.unwrap_err();
        assert!(matches!(error, TransitionError::Engine(_)));
        assert_eq!(session.state(), SessionState::Idle);

        session.accept_offer(&offer_envelope()).await.unwrap();
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;
        assert_eq!(sink.envelopes().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_remote_description_keeps_idle() {
        let mut engine = MockPeerEngine::new();
        engine
            .expect_set_remote_description()
            .times(1)
            .returning(|_| Err(EngineError::Rejected("bad sdp".to_owned())));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, sink, writer) = session_with(engine);

        assert!(session.accept_offer(&offer_envelope()).await.is_err());
        assert_eq!(session.state(), SessionState::Idle);
        finish(session, writer).await;
        assert!(sink.envelopes().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_offer_is_not_sent_to_engine() {
        let mut engine = MockPeerEngine::new();
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);

        let envelope = Envelope::new("offer", json!({"type": "offer"}));
        let error = session.accept_offer(&envelope).await.unwrap_err();
        assert!(matches!(error, TransitionError::Decode(_)));
        assert_eq!(session.state(), SessionState::Idle);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_second_offer_renegotiates() {
        let mut engine = MockPeerEngine::new();
        expect_successful_negotiation(&mut engine, 2);
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, sink, writer) = session_with(engine);

        session.accept_offer(&offer_envelope()).await.unwrap();
        session.accept_offer(&offer_envelope()).await.unwrap();
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;
        assert_eq!(sink.envelopes().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_renegotiation_keeps_negotiated() {
        let mut engine = MockPeerEngine::new();
        let mut calls = 0;
        engine
            .expect_set_remote_description()
            .times(2)
            .returning(move |_| {
                calls += 1;
                if calls == 1 {
                    Ok(())
                } else {
                    Err(EngineError::Rejected("glare".to_owned()))
                }
            });
        engine
            .expect_create_answer()
            .times(1)
            .returning(|| Ok(SessionDescription::answer("v=0 answer")));
        engine
            .expect_set_local_description()
            .times(1)
            .returning(|_| Ok(()));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);

        session.accept_offer(&offer_envelope()).await.unwrap();
        assert!(session.accept_offer(&offer_envelope()).await.is_err());
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_bad_candidate_is_not_fatal() {
        let mut engine = MockPeerEngine::new();
        expect_successful_negotiation(&mut engine, 1);
        engine
            .expect_add_remote_candidate()
            .times(1)
            .returning(|_| Ok(()));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);
        session.accept_offer(&offer_envelope()).await.unwrap();

        let broken = Envelope::new("candidate", json!("candidate:garbage"));
        assert!(matches!(
            session.add_remote_candidate(&broken).await,
            Err(TransitionError::Decode(_))
        ));
        assert_eq!(session.state(), SessionState::Negotiated);

        session
            .add_remote_candidate(&candidate_envelope(0))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_engine_rejecting_candidate_keeps_state() {
        let mut engine = MockPeerEngine::new();
        expect_successful_negotiation(&mut engine, 1);
        engine
            .expect_add_remote_candidate()
            .times(1)
            .returning(|_| Err(EngineError::Rejected("unknown mid".to_owned())));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);
        session.accept_offer(&offer_envelope()).await.unwrap();

        assert!(matches!(
            session.add_remote_candidate(&candidate_envelope(3)).await,
            Err(TransitionError::Engine(_))
        ));
        assert_eq!(session.state(), SessionState::Negotiated);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_early_candidates_are_applied_after_remote_description() {
        let mut engine = MockPeerEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_set_remote_description()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_add_remote_candidate()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_create_answer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(SessionDescription::answer("v=0 answer")));
        engine
            .expect_set_local_description()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);

        session
            .add_remote_candidate(&candidate_envelope(0))
            .await
            .unwrap();
        session
            .add_remote_candidate(&candidate_envelope(1))
            .await
            .unwrap();
        assert_eq!(session.pending_candidates(), 2);
        assert_eq!(session.state(), SessionState::Idle);

        session.accept_offer(&offer_envelope()).await.unwrap();
        assert_eq!(session.pending_candidates(), 0);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_pending_candidates_are_bounded() {
        let mut engine = MockPeerEngine::new();
        engine.expect_close().times(1).returning(|| Ok(()));
        let (mut session, _sink, writer) = session_with(engine);

        for n in 0..(MAX_PENDING_CANDIDATES as u16 + 10) {
            session
                .add_remote_candidate(&candidate_envelope(n))
                .await
                .unwrap();
        }
        assert_eq!(session.pending_candidates(), MAX_PENDING_CANDIDATES);
        finish(session, writer).await;
    }

    #[tokio::test]
    async fn test_local_candidates_are_forwarded() {
        let handler_slot = Arc::new(Mutex::new(None));
        let mut engine = MockPeerEngine::new();
        let slot = handler_slot.clone();
        engine
            .expect_on_local_candidate()
            .times(1)
            .returning(move |handler| *slot.lock().unwrap() = Some(handler));
        engine.expect_on_track().times(1).returning(|_| ());
        engine.expect_close().times(1).returning(|| Ok(()));
        let (session, sink, writer) = session_with(engine);
        session.attach_engine_callbacks(None);

        {
            let guard = handler_slot.lock().unwrap();
            let handler = guard.as_ref().unwrap();
            for n in 0..2 {
                handler(Some(IceCandidate {
                    candidate: format!("candidate:{n} 1 udp 1 10.0.0.1 500{n} typ host"),
                    sdp_mid: Some("0".to_owned()),
                    sdp_m_line_index: Some(0),
                    username_fragment: None,
                }));
            }
            handler(None);
        }
        finish(session, writer).await;

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 2);
        for envelope in envelopes {
            assert_eq!(envelope.kind(), Some(EventKind::Candidate));
            envelope.payload::<IceCandidate>().unwrap();
        }
    }

    #[tokio::test]
    async fn test_tracks_reach_the_observer() {
        let handler_slot = Arc::new(Mutex::new(None));
        let mut engine = MockPeerEngine::new();
        engine.expect_on_local_candidate().returning(|_| ());
        let slot = handler_slot.clone();
        engine
            .expect_on_track()
            .times(1)
            .returning(move |handler| *slot.lock().unwrap() = Some(handler));
        engine.expect_close().times(1).returning(|| Ok(()));
        let (session, sink, writer) = session_with(engine);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = seen.clone();
        session.attach_engine_callbacks(Some(Arc::new(move |id: ClientId, kind: TrackKind| {
            observed.lock().unwrap().push((id, kind))
        })));
        (handler_slot.lock().unwrap().as_ref().unwrap())(TrackKind::Video);
        finish(session, writer).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ClientId::new(7), TrackKind::Video)]
        );
        assert!(sink.envelopes().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_engine_before_channel() {
        let sink = RecordingSink::default();
        let sink_closes_seen_by_engine = Arc::new(Mutex::new(None));
        let closes = sink.closes.clone();
        let observed = sink_closes_seen_by_engine.clone();
        let mut engine = MockPeerEngine::new();
        engine.expect_close().times(1).returning(move || {
            *observed.lock().unwrap() = Some(*closes.lock().unwrap());
            Ok(())
        });
        let (outbound, writer) = Outbound::spawn(ClientId::new(8), sink.clone());
        let session = Session::new(
            ClientId::new(8),
            Box::new(engine),
            outbound,
            Duration::from_secs(5),
        );
        finish(session, writer).await;

        assert_eq!(*sink_closes_seen_by_engine.lock().unwrap(), Some(0));
        assert_eq!(*sink.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_errors_are_absorbed() {
        let mut engine = MockPeerEngine::new();
        engine
            .expect_close()
            .times(1)
            .returning(|| Err(EngineError::Rejected("already closed".to_owned())));
        let (session, sink, writer) = session_with(engine);
        finish(session, writer).await;
        assert_eq!(*sink.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_report_error_sends_error_envelope() {
        let mut engine = MockPeerEngine::new();
        engine.expect_close().times(1).returning(|| Ok(()));
        let (session, sink, writer) = session_with(engine);
        session.report_error(Some(EventKind::Offer), &"negotiation failed");
        finish(session, writer).await;

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(
            envelopes[0].data(),
            &json!({"event": "offer", "message": "negotiation failed"})
        );
    }
}
