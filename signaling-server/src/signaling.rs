use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, Stream, StreamExt};
use log::{error, info, warn};
use tokio::sync::watch;
use warp::ws::WebSocket;

use crate::channel::{split_websocket, Frame, TransportError};
use crate::dispatcher::client_message;
use crate::engine::{EngineConfig, EngineFactory};
use crate::outbound::Outbound;
use crate::session::{Session, TrackObserver};
use crate::ClientId;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a new session needs, shared by all connections.
#[derive(Clone)]
pub struct SignalingContext {
    pub factory: Arc<dyn EngineFactory>,
    pub engine_config: Arc<EngineConfig>,
    pub negotiation_timeout: Duration,
    pub track_observer: Option<TrackObserver>,
    pub shutdown: watch::Receiver<bool>,
}

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CloseReason {
    /// Close frame or end of stream.
    PeerClosed,
    /// Reading from the channel failed.
    ReadFailed,
    /// Writing to the channel failed.
    WriteFailed,
    /// The server is shutting down.
    Shutdown,
    /// No engine could be created; the loop never started.
    EngineUnavailable,
}

pub async fn client_connected(ws: WebSocket, ctx: SignalingContext) {
    let (sink, stream) = split_websocket(ws);
    run_session(sink, stream, ctx).await;
}

/// Drive one client: create its engine, serve inbound envelopes until the channel ends,
/// then release the engine and the channel.
pub async fn run_session<K, S>(sink: K, mut stream: S, ctx: SignalingContext) -> CloseReason
where
    K: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let client_id = ClientId::new(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
    info!("new client connected: {:?}", client_id);

    let (outbound, mut writer) = Outbound::spawn(client_id, sink);
    let engine = match ctx.factory.create(&ctx.engine_config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("failed to create peer connection for {:?}: {}", client_id, e);
            if let Err(e) = outbound.close().await {
                error!("failed to close websocket of {:?}: {}", client_id, e);
            }
            return CloseReason::EngineUnavailable;
        }
    };

    let mut session = Session::new(client_id, engine, outbound, ctx.negotiation_timeout);
    session.attach_engine_callbacks(ctx.track_observer.clone());

    let mut shutdown = ctx.shutdown.clone();
    let reason = loop {
        if *shutdown.borrow() {
            break CloseReason::Shutdown;
        }
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Close)) | None => break CloseReason::PeerClosed,
                Some(Ok(Frame::Control)) => {}
                Some(Ok(frame)) => {
                    if let Some(bytes) = frame.payload() {
                        client_message(&mut session, bytes).await;
                    }
                }
                Some(Err(e)) => {
                    error!("websocket error (id={:?}): {}", client_id, e);
                    break CloseReason::ReadFailed;
                }
            },
            _ = &mut writer.failed => break CloseReason::WriteFailed,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!("shutdown signal dropped, stopping {:?}", client_id);
                    break CloseReason::Shutdown;
                }
            }
        }
    };

    info!("client disconnected: {:?} ({:?})", client_id, reason);
    session.close().await;
    reason
}
