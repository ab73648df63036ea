//! Shared protocol definitions for CodeCrew.
//!
//! Contains the signaling wire messages exchanged with the session
//! relay and the participant/session types shared between the
//! orchestrator and the application layer.

mod messages;
mod types;

pub use messages::SignalingMessage;
pub use types::{
    IceCandidateData, ParticipantInfo, ParticipantRole, SdpType, SessionDescription, SessionInfo,
    SessionKind,
};
