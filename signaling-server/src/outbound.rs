//! Serialized access to the write half of a client channel.
//!
//! The sink is owned by a single writer task. Every producer (the session loop, the
//! engine's candidate callback) holds a cloned [Outbound] and only enqueues commands, so
//! each envelope is encoded and written in one piece and writes never interleave.

use futures_util::{Sink, SinkExt};
use log::{debug, error, warn};
use rtc_signal_protocol::Envelope;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{Frame, TransportError};
use crate::ClientId;

#[derive(Debug, Error)]
#[error("outbound channel is closed")]
pub struct OutboundClosed;

enum Command {
    Send(Envelope),
    Close(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct Outbound {
    client_id: ClientId,
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send(envelope) => write!(f, "Send({})", envelope.event()),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}

/// Writer side of a session: resolves once if a write to the sink fails.
pub struct Writer {
    pub failed: oneshot::Receiver<TransportError>,
    pub task: JoinHandle<()>,
}

impl Outbound {
    /// Spawn the writer task that owns `sink`.
    pub fn spawn<K>(client_id: ClientId, sink: K) -> (Outbound, Writer)
    where
        K: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed_tx, failed) = oneshot::channel();
        let task = tokio::task::spawn(write_loop(client_id, sink, rx, failed_tx));
        (Outbound { client_id, tx }, Writer { failed, task })
    }

    /// Queue one envelope. Never waits on the write itself.
    pub fn send(&self, envelope: Envelope) -> Result<(), OutboundClosed> {
        self.tx
            .send(Command::Send(envelope))
            .map_err(|_| OutboundClosed)
    }

    /// Close the sink after everything queued before this call has been written.
    pub async fn close(&self) -> Result<(), OutboundClosed> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Close(done_tx))
            .map_err(|_| OutboundClosed)?;
        done_rx.await.map_err(|_| OutboundClosed)
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

async fn write_loop<K>(
    client_id: ClientId,
    mut sink: K,
    mut rx: mpsc::UnboundedReceiver<Command>,
    failed_tx: oneshot::Sender<TransportError>,
) where
    K: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut failed_tx = Some(failed_tx);
    while let Some(command) = rx.recv().await {
        match command {
            Command::Send(envelope) => {
                if failed_tx.is_none() {
                    debug!(
                        "dropping `{}` for {:?}, channel already failed",
                        envelope.event(),
                        client_id
                    );
                    continue;
                }
                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("{:?}: {}", client_id, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Frame::Text(text)).await {
                    error!("websocket send error (id={:?}): {}", client_id, e);
                    if let Some(tx) = failed_tx.take() {
                        let _ = tx.send(e);
                    }
                }
            }
            Command::Close(done) => {
                if let Err(e) = sink.close().await {
                    warn!("failed to close websocket (id={:?}): {}", client_id, e);
                }
                let _ = done.send(());
                break;
            }
        }
    }
    debug!("writer stopped for {:?}", client_id);
}
