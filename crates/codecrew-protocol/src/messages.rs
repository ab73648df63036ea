use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IceCandidateData, ParticipantInfo, ParticipantRole, SessionDescription};

fn default_board_color() -> String {
    "#000000".to_string()
}

fn default_board_width() -> f32 {
    2.0
}

/// Messages exchanged with the session relay over the signaling
/// WebSocket, in both directions.
///
/// One `type` field disambiguates the union. Unicast messages carry
/// `targetUserId` when sent and get `fromUserId` stamped on by the
/// relay before delivery; `join`/`leave`/roster/chat/board messages
/// are broadcast to the whole session.
///
/// Unknown `type` values fail deserialization; the channel drops and
/// logs them rather than falling through silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SignalingMessage {
    /// Announce membership. Sent on every channel open, including
    /// re-opens after a reconnect (the relay holds no session
    /// affinity across connections).
    Join {
        session_id: Uuid,
        user_id: Uuid,
        user_name: String,
        role: ParticipantRole,
    },

    /// A participant left the session.
    Leave { user_id: Uuid },

    /// Full roster snapshot, sent by the relay to a newly-connected
    /// client and rebroadcast on membership changes.
    ParticipantsList { participants: Vec<ParticipantInfo> },

    /// Session-description offer, unicast to `target_user_id`.
    Offer {
        offer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user_id: Option<Uuid>,
    },

    /// Session-description answer, unicast to `target_user_id`.
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user_id: Option<Uuid>,
    },

    /// One trickled ICE candidate, unicast to `target_user_id`.
    IceCandidate {
        candidate: IceCandidateData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user_id: Option<Uuid>,
    },

    /// Chat text, broadcast by the relay to the whole roster.
    ChatMessage {
        user_id: Uuid,
        user_name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// One whiteboard stroke segment, broadcast to the whole roster.
    WhiteboardDraw {
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        #[serde(default = "default_board_color")]
        color: String,
        #[serde(default = "default_board_width")]
        width: f32,
    },

    /// Clear the shared whiteboard, broadcast to the whole roster.
    WhiteboardClear,
}

impl SignalingMessage {
    /// The peer this message is correlated to, for messages that
    /// drive exactly one peer link: `from_user_id` on inbound
    /// unicast, `target_user_id` on outbound.
    pub fn peer_id(&self) -> Option<Uuid> {
        match self {
            SignalingMessage::Offer {
                from_user_id,
                target_user_id,
                ..
            }
            | SignalingMessage::Answer {
                from_user_id,
                target_user_id,
                ..
            }
            | SignalingMessage::IceCandidate {
                from_user_id,
                target_user_id,
                ..
            } => from_user_id.or(*target_user_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpType;

    #[test]
    fn join_wire_format() {
        let msg = SignalingMessage::Join {
            session_id: Uuid::nil(),
            user_id: Uuid::nil(),
            user_name: "Ada".to_string(),
            role: ParticipantRole::Host,
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["userName"], "Ada");
        assert_eq!(json["role"], "host");
        assert!(json.get("sessionId").is_some());
    }

    #[test]
    fn offer_omits_absent_routing_fields() {
        let msg = SignalingMessage::Offer {
            offer: SessionDescription {
                kind: SdpType::Offer,
                sdp: "v=0".to_string(),
            },
            target_user_id: Some(Uuid::nil()),
            from_user_id: None,
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["offer"]["type"], "offer");
        assert!(json.get("targetUserId").is_some());
        assert!(json.get("fromUserId").is_none());
    }

    #[test]
    fn ice_candidate_field_capitalization() {
        let msg = SignalingMessage::IceCandidate {
            candidate: IceCandidateData {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
            target_user_id: Some(Uuid::nil()),
            from_user_id: None,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"sdpMid\""));
        assert!(text.contains("\"sdpMLineIndex\""));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"mystery","payload":42}"#;
        assert!(serde_json::from_str::<SignalingMessage>(raw).is_err());
    }

    #[test]
    fn inbound_offer_carries_from_user_id() {
        let raw = r#"{
            "type": "offer",
            "offer": {"type": "offer", "sdp": "v=0"},
            "targetUserId": "00000000-0000-0000-0000-000000000001",
            "fromUserId": "00000000-0000-0000-0000-000000000002"
        }"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        let from = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        assert_eq!(msg.peer_id(), Some(from));
    }

    #[test]
    fn whiteboard_draw_defaults() {
        let raw = r#"{"type":"whiteboard_draw","x0":0.0,"y0":0.0,"x1":1.0,"y1":1.0}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            SignalingMessage::WhiteboardDraw { color, width, .. } => {
                assert_eq!(color, "#000000");
                assert_eq!(width, 2.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
