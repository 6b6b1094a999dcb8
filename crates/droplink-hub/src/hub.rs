//! Roster and message router
//!
//! The hub is a single task that owns the `PeerId -> PeerHandle` map. All
//! roster mutations and all fan-outs run on that task, serialized through a
//! bounded command mailbox, so no lock is ever held across an outbound send
//! and a slow peer can never stall the roster: deliveries to peers use the
//! non-blocking [`PeerHandle::send`] path and overflow is just logged.

use std::collections::HashMap;

use droplink_proto::{
    ClientFrame, PeerId, PeerInfo, PublicPeer, ServerFrame, CODE_BAD_REQUEST, CODE_NOT_FOUND,
};
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::peer::{PeerHandle, SendError};

/// Command mailbox depth. Producers (connection readers) block until there is
/// room, which back-pressures a saturated hub onto the sockets.
pub const COMMAND_CAPACITY: usize = 256;

/// The hub has shut down and accepts no further commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hub is shut down")]
pub struct HubClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("hub is shut down")]
    HubClosed,
    #[error("peer id is already registered")]
    Duplicate,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("hub is shut down")]
    HubClosed,
    #[error("unknown message kind")]
    UnknownKind,
    #[error("sender is not registered")]
    UnknownSender,
    #[error("delivery to target failed: {0}")]
    Delivery(#[from] SendError),
}

/// What a newly registered peer learns about the world.
///
/// Both lists describe the roster as it was immediately before the insertion;
/// the handles stay valid addresses even after the hub moves on.
#[derive(Debug)]
pub struct Registration {
    pub peers: Vec<PublicPeer>,
    pub existing: Vec<PeerHandle>,
}

enum Command {
    Register {
        peer: PeerHandle,
        reply: oneshot::Sender<Result<Registration, RegisterError>>,
    },
    Unregister {
        peer_id: PeerId,
    },
    Route {
        peer_id: PeerId,
        frame: ClientFrame,
        reply: oneshot::Sender<Result<(), RouteError>>,
    },
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Start the hub task and return a handle to it.
    pub fn spawn() -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let shutdown = CancellationToken::new();
        let task = HubTask {
            roster: HashMap::new(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(task.run(command_rx));
        Self { commands, shutdown }
    }

    /// Add a peer to the roster.
    ///
    /// Returns a consistent snapshot of everyone present before the addition:
    /// no other mutation interleaves between the snapshot and the insert. A
    /// peer id that is already registered is rejected.
    pub async fn register(&self, peer: PeerHandle) -> Result<Registration, RegisterError> {
        let (reply, reply_rx) = oneshot::channel();
        self.enqueue(Command::Register { peer, reply })
            .await
            .map_err(|HubClosed| RegisterError::HubClosed)?;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(RegisterError::HubClosed),
            result = reply_rx => result.map_err(|_| RegisterError::HubClosed)?,
        }
    }

    /// Drop a peer from the roster, telling everyone else it left.
    ///
    /// Fire-and-forget; an id that is not registered is a silent no-op.
    pub async fn unregister(&self, peer_id: PeerId) -> Result<(), HubClosed> {
        self.enqueue(Command::Unregister { peer_id }).await
    }

    /// Process one inbound frame in the sender's context and wait for the
    /// outcome.
    pub async fn route(&self, peer_id: PeerId, frame: ClientFrame) -> Result<(), RouteError> {
        let (reply, reply_rx) = oneshot::channel();
        self.enqueue(Command::Route {
            peer_id,
            frame,
            reply,
        })
        .await
        .map_err(|HubClosed| RouteError::HubClosed)?;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(RouteError::HubClosed),
            result = reply_rx => result.map_err(|_| RouteError::HubClosed)?,
        }
    }

    /// Stop the hub task. Every registered peer is closed on the way out.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Hand a command to the hub task, waiting for mailbox space.
    async fn enqueue(&self, command: Command) -> Result<(), HubClosed> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(HubClosed),
            sent = self.commands.send(command) => sent.map_err(|_| HubClosed),
        }
    }
}

/// Payload of a signaling frame headed for one target peer.
enum SignalPayload {
    Offer(String),
    Answer(String),
    Candidate(Box<RawValue>),
}

struct HubTask {
    roster: HashMap<PeerId, PeerHandle>,
    shutdown: CancellationToken,
}

impl HubTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        for peer in self.roster.values() {
            peer.close();
        }
        debug!("hub task stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { peer, reply } => {
                let _ = reply.send(self.register(peer).await);
            }
            Command::Unregister { peer_id } => self.unregister(peer_id),
            Command::Route {
                peer_id,
                frame,
                reply,
            } => {
                let _ = reply.send(self.route(peer_id, frame).await);
            }
        }
    }

    async fn register(&mut self, peer: PeerHandle) -> Result<Registration, RegisterError> {
        if self.roster.contains_key(&peer.id()) {
            return Err(RegisterError::Duplicate);
        }
        let mut peers = Vec::with_capacity(self.roster.len());
        let mut existing = Vec::with_capacity(self.roster.len());
        for other in self.roster.values() {
            peers.push(other.public_peer().await);
            existing.push(other.clone());
        }
        debug!(peer = %peer.id(), roster = self.roster.len() + 1, "peer registered");
        self.roster.insert(peer.id(), peer);
        Ok(Registration { peers, existing })
    }

    fn unregister(&mut self, peer_id: PeerId) {
        let Some(peer) = self.roster.remove(&peer_id) else {
            return;
        };
        self.fan_out(&ServerFrame::Left { peer_id }, peer_id);
        peer.close();
        debug!(peer = %peer_id, roster = self.roster.len(), "peer unregistered");
    }

    async fn route(&self, sender_id: PeerId, frame: ClientFrame) -> Result<(), RouteError> {
        match frame {
            ClientFrame::Update { info } => self.route_update(sender_id, info).await,
            ClientFrame::Offer {
                session_id,
                target,
                sdp,
            } => {
                self.route_signal(sender_id, session_id, target, SignalPayload::Offer(sdp))
                    .await
            }
            ClientFrame::Answer {
                session_id,
                target,
                sdp,
            } => {
                self.route_signal(sender_id, session_id, target, SignalPayload::Answer(sdp))
                    .await
            }
            ClientFrame::Candidate {
                session_id,
                target,
                candidate,
            } => match candidate {
                Some(candidate) => {
                    self.route_signal(
                        sender_id,
                        session_id,
                        target,
                        SignalPayload::Candidate(candidate),
                    )
                    .await
                }
                None => self.reject(sender_id),
            },
            ClientFrame::Unknown => Err(RouteError::UnknownKind),
        }
    }

    async fn route_update(
        &self,
        sender_id: PeerId,
        info: Option<PeerInfo>,
    ) -> Result<(), RouteError> {
        let Some(sender) = self.roster.get(&sender_id) else {
            return Err(RouteError::UnknownSender);
        };
        let Some(info) = info else {
            return Ok(());
        };
        sender.set_info(info).await;
        let frame = ServerFrame::Update {
            peer: sender.public_peer().await,
        };
        self.fan_out(&frame, sender_id);
        Ok(())
    }

    async fn route_signal(
        &self,
        sender_id: PeerId,
        session_id: String,
        target: String,
        payload: SignalPayload,
    ) -> Result<(), RouteError> {
        let Some(sender) = self.roster.get(&sender_id) else {
            return Err(RouteError::UnknownSender);
        };
        let body_ok = match &payload {
            SignalPayload::Offer(sdp) | SignalPayload::Answer(sdp) => !sdp.is_empty(),
            SignalPayload::Candidate(_) => true,
        };
        if session_id.is_empty() || target.is_empty() || !body_ok {
            return self.reject(sender_id);
        }
        let Ok(target_id) = PeerId::parse(&target) else {
            return self.reject(sender_id);
        };
        let Some(target_peer) = self.roster.get(&target_id) else {
            debug!(sender = %sender_id, %target, "signaling target not connected");
            if let Err(err) = sender.send_frame(&ServerFrame::Error {
                code: CODE_NOT_FOUND,
            }) {
                debug!(peer = %sender_id, %err, "error reply dropped");
            }
            return Ok(());
        };
        let peer = sender.public_peer().await;
        let frame = match payload {
            SignalPayload::Offer(sdp) => ServerFrame::Offer {
                peer,
                session_id,
                sdp,
            },
            SignalPayload::Answer(sdp) => ServerFrame::Answer {
                peer,
                session_id,
                sdp,
            },
            SignalPayload::Candidate(candidate) => ServerFrame::Candidate {
                peer,
                session_id,
                candidate,
            },
        };
        target_peer.send_frame(&frame)?;
        debug!(sender = %sender_id, target = %target_id, "signaling frame forwarded");
        Ok(())
    }

    /// Answer a malformed frame with `ERROR 400` on the sender's socket.
    fn reject(&self, sender_id: PeerId) -> Result<(), RouteError> {
        let Some(sender) = self.roster.get(&sender_id) else {
            return Err(RouteError::UnknownSender);
        };
        if let Err(err) = sender.send_frame(&ServerFrame::Error {
            code: CODE_BAD_REQUEST,
        }) {
            debug!(peer = %sender_id, %err, "error reply dropped");
        }
        Ok(())
    }

    /// Deliver a frame to everyone except `exclude`. Per-peer failures are
    /// logged and do not abort the iteration.
    fn fan_out(&self, frame: &ServerFrame, exclude: PeerId) {
        for (id, peer) in &self.roster {
            if *id == exclude {
                continue;
            }
            if let Err(err) = peer.send_frame(frame) {
                debug!(peer = %id, %err, "fan-out frame dropped");
            }
        }
    }
}
