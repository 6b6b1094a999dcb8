//! Wire protocol for the droplink signaling hub
//!
//! Every frame on the socket is a UTF-8 JSON object with a `type` tag.
//! Clients send `ClientFrame`s, the hub answers with `ServerFrame`s. ICE
//! candidate payloads are opaque to the hub and are carried as raw JSON so
//! they reach the target peer byte-for-byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// `ERROR` code for malformed or invalid frames.
pub const CODE_BAD_REQUEST: u16 = 400;

/// `ERROR` code for a signaling target that is not connected.
pub const CODE_NOT_FOUND: u16 = 404;

/// Identifier of one live connection, minted by the hub at upgrade time.
///
/// Ids are never reused; a reconnecting client gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the `target` field of a signaling frame.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-provided descriptive fields, visible to every other peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(
        rename = "deviceModel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_model: Option<String>,
    #[serde(
        rename = "deviceType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `PeerInfo` together with the hub-assigned id, as embedded in server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPeer {
    pub id: PeerId,
    #[serde(flatten)]
    pub info: PeerInfo,
}

/// One ICE server entry advertised in `HELLO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Frames accepted from clients.
///
/// String fields that a client omits decode as empty; the hub validates them
/// when routing and answers `ERROR 400` rather than rejecting the frame at
/// decode time. An unrecognized `type` tag decodes as [`ClientFrame::Unknown`].
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "WireClientFrame")]
pub enum ClientFrame {
    Update {
        info: Option<PeerInfo>,
    },
    Offer {
        session_id: String,
        target: String,
        sdp: String,
    },
    Answer {
        session_id: String,
        target: String,
        sdp: String,
    },
    Candidate {
        session_id: String,
        target: String,
        candidate: Option<Box<RawValue>>,
    },
    Unknown,
}

/// Flat decode target for [`ClientFrame`].
///
/// `RawValue` cannot be deserialized from inside an internally tagged enum
/// (the tag machinery buffers the input), so inbound frames decode through
/// this wire-shaped struct first.
#[derive(Deserialize)]
struct WireClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "sessionId", default)]
    session_id: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    sdp: String,
    #[serde(default)]
    candidate: Option<Box<RawValue>>,
    #[serde(default)]
    info: Option<PeerInfo>,
}

impl From<WireClientFrame> for ClientFrame {
    fn from(wire: WireClientFrame) -> Self {
        match wire.kind.as_str() {
            "UPDATE" => ClientFrame::Update { info: wire.info },
            "OFFER" => ClientFrame::Offer {
                session_id: wire.session_id,
                target: wire.target,
                sdp: wire.sdp,
            },
            "ANSWER" => ClientFrame::Answer {
                session_id: wire.session_id,
                target: wire.target,
                sdp: wire.sdp,
            },
            "CANDIDATE" => ClientFrame::Candidate {
                session_id: wire.session_id,
                target: wire.target,
                candidate: wire.candidate,
            },
            _ => ClientFrame::Unknown,
        }
    }
}

/// Frames emitted by the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Sent once to a peer right after its registration succeeds.
    #[serde(rename = "HELLO")]
    Hello {
        client: PublicPeer,
        peers: Vec<PublicPeer>,
        #[serde(rename = "iceServers", skip_serializing_if = "Vec::is_empty")]
        ice_servers: Vec<IceServer>,
    },
    /// A newcomer registered; sent to every pre-existing peer.
    #[serde(rename = "JOIN")]
    Join { peer: PublicPeer },
    /// A peer replaced its info; sent to every other peer.
    #[serde(rename = "UPDATE")]
    Update { peer: PublicPeer },
    /// A peer disconnected; sent to every remaining peer.
    #[serde(rename = "LEFT")]
    Left {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    #[serde(rename = "OFFER")]
    Offer {
        peer: PublicPeer,
        #[serde(rename = "sessionId")]
        session_id: String,
        sdp: String,
    },
    #[serde(rename = "ANSWER")]
    Answer {
        peer: PublicPeer,
        #[serde(rename = "sessionId")]
        session_id: String,
        sdp: String,
    },
    #[serde(rename = "CANDIDATE")]
    Candidate {
        peer: PublicPeer,
        #[serde(rename = "sessionId")]
        session_id: String,
        candidate: Box<RawValue>,
    },
    #[serde(rename = "ERROR")]
    Error { code: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn decode_offer() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"OFFER","sessionId":"s1","target":"3c8f0c6e-9a10-4a0f-8a5a-0e6f2f1c9d21","sdp":"v=0"}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Offer {
                session_id,
                target,
                sdp,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(target, "3c8f0c6e-9a10-4a0f-8a5a-0e6f2f1c9d21");
                assert_eq!(sdp, "v=0");
            }
            other => panic!("expected Offer, got {:?}", other),
        }
    }

    #[test]
    fn missing_fields_decode_empty() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ANSWER"}"#).unwrap();
        match frame {
            ClientFrame::Answer {
                session_id,
                target,
                sdp,
            } => {
                assert!(session_id.is_empty());
                assert!(target.is_empty());
                assert!(sdp.is_empty());
            }
            other => panic!("expected Answer, got {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_decodes_as_unknown() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"SUBSCRIBE","x":1}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Unknown));
    }

    #[test]
    fn frame_without_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"sessionId":"s1"}"#).is_err());
    }

    #[test]
    fn candidate_payload_is_kept_verbatim() {
        // Interior spacing and key order must survive the round trip.
        let text = r#"{"type":"CANDIDATE","sessionId":"s1","target":"t","candidate":{ "candidate" : "candidate:1 1 UDP 2122260223" ,"sdpMid":"0"}}"#;
        let frame: ClientFrame = serde_json::from_str(text).unwrap();
        let candidate = match frame {
            ClientFrame::Candidate { candidate, .. } => candidate.unwrap(),
            other => panic!("expected Candidate, got {:?}", other),
        };
        assert_eq!(
            candidate.get(),
            r#"{ "candidate" : "candidate:1 1 UDP 2122260223" ,"sdpMid":"0"}"#
        );

        let out = ServerFrame::Candidate {
            peer: PublicPeer {
                id: PeerId::random(),
                info: PeerInfo::default(),
            },
            session_id: "s1".to_string(),
            candidate,
        };
        let encoded = serde_json::to_string(&out).unwrap();
        assert!(
            encoded.contains(r#"{ "candidate" : "candidate:1 1 UDP 2122260223" ,"sdpMid":"0"}"#),
            "raw candidate bytes missing from {encoded}"
        );
    }

    #[test]
    fn hello_shape() {
        let id = PeerId::parse("9b2e74aa-5be2-4bc0-90e6-2e0c2f7e3a01").unwrap();
        let frame = ServerFrame::Hello {
            client: PublicPeer {
                id,
                info: PeerInfo {
                    alias: Some("alice".to_string()),
                    ..Default::default()
                },
            },
            peers: Vec::new(),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "HELLO",
                "client": {"id": "9b2e74aa-5be2-4bc0-90e6-2e0c2f7e3a01", "alias": "alice"},
                "peers": [],
                "iceServers": [{"urls": ["stun:stun.l.google.com:19302"]}],
            })
        );
    }

    #[test]
    fn empty_info_fields_are_omitted() {
        let frame = ServerFrame::Join {
            peer: PublicPeer {
                id: PeerId::random(),
                info: PeerInfo::default(),
            },
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        let peer = value.get("peer").unwrap().as_object().unwrap();
        assert_eq!(peer.len(), 1, "only the id should be present: {peer:?}");
        assert!(peer.contains_key("id"));
    }

    #[test]
    fn left_frame_names_the_peer() {
        let id = PeerId::random();
        let value: Value = serde_json::to_value(&ServerFrame::Left { peer_id: id }).unwrap();
        assert_eq!(value, json!({"type": "LEFT", "peerId": id.to_string()}));
    }
}
