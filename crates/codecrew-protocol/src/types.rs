use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a participant inside a live session.
///
/// The role decides connection-initiation policy: only a host ever
/// originates an offer, attendees answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Attendee,
}

impl ParticipantRole {
    /// Whether this role originates media connections.
    pub fn initiates(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }
}

/// One entry of the session roster as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: Uuid,
    pub user_name: String,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as produced by one side of the negotiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// One ICE candidate as carried on the wire (trickled, not batched).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidateData {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// What kind of session this is. Only `Video` sessions enter the
/// media orchestrator; everything else stays in the regular UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Video,
    Whiteboard,
    Quiz,
    #[serde(other)]
    Other,
}

/// Session metadata from `GET /sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub title: String,
    pub session_type: SessionKind,
}

impl SessionInfo {
    pub fn is_video(&self) -> bool {
        self.session_type == SessionKind::Video
    }
}
