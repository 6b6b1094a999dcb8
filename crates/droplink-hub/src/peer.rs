//! Per-connection actor
//!
//! Each websocket peer is owned by two cooperative tasks: a reader that
//! decodes inbound frames and hands them to the hub, and a writer that drains
//! the peer's bounded outbox and keeps the connection alive with pings. The
//! [`PeerHandle`] is the cloneable address other tasks use to reach the peer;
//! it never blocks and never touches the socket directly.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use droplink_proto::{ClientFrame, PeerId, PeerInfo, PublicPeer, ServerFrame, CODE_BAD_REQUEST};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::hub::{Hub, RouteError};

/// How long a connection may stay silent before it is presumed dead. Only a
/// pong frame resets the clock.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval; 90% of [`PONG_WAIT`] so a healthy peer always pongs in time.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Deadline for a single socket write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Outbound mailbox depth. Enough for a burst of roster traffic; a peer that
/// falls further behind starts losing fan-out frames instead of stalling the
/// hub.
pub const OUTBOX_CAPACITY: usize = 64;

/// Why a non-blocking send did not reach the peer's outbox.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("peer mailbox full")]
    MailboxFull,
    #[error("peer connection closed")]
    Closed,
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cloneable address of one connected peer.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    id: PeerId,
    info: Arc<RwLock<PeerInfo>>,
    outbox: mpsc::Sender<Message>,
    latch: CancellationToken,
}

impl PeerHandle {
    /// Build the handle and the outbox end the writer task will drain.
    pub fn new(id: PeerId) -> (Self, mpsc::Receiver<Message>) {
        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let handle = Self {
            id,
            info: Arc::new(RwLock::new(PeerInfo::default())),
            outbox,
            latch: CancellationToken::new(),
        };
        (handle, outbox_rx)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Snapshot of the peer's announced info, with its id attached.
    pub async fn public_peer(&self) -> PublicPeer {
        PublicPeer {
            id: self.id,
            info: self.info.read().await.clone(),
        }
    }

    pub async fn set_info(&self, info: PeerInfo) {
        *self.info.write().await = info;
    }

    /// Enqueue one outbound message. Never waits: a full outbox or a closed
    /// peer is reported immediately.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        if self.latch.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbox.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Serialize a server frame and enqueue it as a text message.
    pub fn send_frame(&self, frame: &ServerFrame) -> Result<(), SendError> {
        let text = serde_json::to_string(frame)?;
        self.send(Message::Text(text))
    }

    /// Fire the close latch. Idempotent; both the reader and the writer exit
    /// at their next scheduling point, and the writer closes the socket.
    pub fn close(&self) {
        self.latch.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.latch.is_cancelled()
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.latch.cancelled()
    }
}

/// Reader half: decode inbound frames and hand them to the hub.
///
/// Exits on the close latch, a missed liveness deadline, or any socket-level
/// read failure, then unregisters the peer and fires the latch.
pub(crate) async fn read_loop(mut stream: SplitStream<WebSocket>, peer: PeerHandle, hub: Hub) {
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        let next = tokio::select! {
            _ = peer.closed() => break,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(peer = %peer.id(), "liveness deadline expired");
                break;
            }
            next = stream.next() => next,
        };
        let Some(next) = next else { break };
        match next {
            Ok(Message::Pong(_)) => deadline = Instant::now() + PONG_WAIT,
            Ok(Message::Ping(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => {
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(peer = %peer.id(), %err, "invalid frame");
                        let _ = peer.send_frame(&ServerFrame::Error {
                            code: CODE_BAD_REQUEST,
                        });
                        continue;
                    }
                };
                match hub.route(peer.id(), frame).await {
                    Ok(()) => {}
                    Err(RouteError::UnknownKind) => {
                        let _ = peer.send_frame(&ServerFrame::Error {
                            code: CODE_BAD_REQUEST,
                        });
                    }
                    Err(RouteError::HubClosed) => break,
                    Err(err) => debug!(peer = %peer.id(), %err, "route failed"),
                }
            }
            Ok(Message::Binary(_)) => {
                // The protocol is text frames only.
                let _ = peer.send_frame(&ServerFrame::Error {
                    code: CODE_BAD_REQUEST,
                });
            }
            Err(err) => {
                debug!(peer = %peer.id(), %err, "read failed");
                break;
            }
        }
    }

    // Best effort: the hub may already be shutting down, in which case it
    // closes every peer itself.
    let _ = hub.unregister(peer.id()).await;
    peer.close();
}

/// Writer half: drain the outbox and ping on an interval.
///
/// A failed text write is logged and tolerated; a failed ping means the
/// socket is dead. Owns the sink, so the socket is closed exactly once.
pub(crate) async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Message>,
    peer: PeerHandle,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            _ = peer.closed() => break,
            message = outbox.recv() => {
                let Some(message) = message else { break };
                match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!(peer = %peer.id(), %err, "write failed"),
                    Err(_) => debug!(peer = %peer.id(), "write timed out"),
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!(peer = %peer.id(), "ping failed, dropping connection");
                        break;
                    }
                }
            }
        }
    }
    let _ = sink.close().await;
    peer.close();
}
