//! Routes one inbound envelope to the matching session transition.

use log::{debug, warn};
use rtc_signal_protocol::{Envelope, EventKind};

use crate::session::Session;

/// Decode one data frame and dispatch it. Frames that are not envelopes are dropped.
pub async fn client_message(session: &mut Session, bytes: &[u8]) {
    let envelope = match Envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("dropping message from {:?}: {}", session.id(), e);
            session.report_error(None, &e);
            return;
        }
    };
    dispatch(session, &envelope).await;
}

/// Invoke exactly one transition for `envelope`. Transition errors end here: they are
/// logged, and a failed offer is reported back to the client.
pub async fn dispatch(session: &mut Session, envelope: &Envelope) {
    match envelope.kind() {
        Some(EventKind::Offer) => {
            if let Err(e) = session.accept_offer(envelope).await {
                warn!("offer from {:?} failed: {}", session.id(), e);
                session.report_error(Some(EventKind::Offer), &e);
            }
        }
        Some(EventKind::Candidate) => {
            if let Err(e) = session.add_remote_candidate(envelope).await {
                warn!("candidate from {:?} dropped: {}", session.id(), e);
            }
        }
        Some(kind @ (EventKind::Answer | EventKind::Error)) => {
            debug!("ignoring `{}` from {:?}: {}", kind, session.id(), envelope.data());
        }
        None => {
            debug!(
                "ignoring unrecognized event `{}` from {:?}",
                envelope.event(),
                session.id()
            );
        }
    }
}
