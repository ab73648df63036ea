//! Pure negotiation protocol logic.
//!
//! Everything here is a decision, not an action: given a signaling
//! event and the current per-peer state, decide what the link table
//! should do. Keeping this free of transport and WebRTC calls makes
//! the asymmetric initiation policy and the candidate-ordering rule
//! directly testable.

use codecrew_protocol::ParticipantRole;
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Per-link negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreating,
    OfferSent,
    AnswerCreating,
    AnswerSent,
    Connected,
    Reconnecting,
    Closed,
}

/// What to do with an inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferVerdict {
    /// Create a link and answer it.
    Answer,
    /// We initiate, we never answer.
    IgnoreInitiatorRole,
    /// A link for this peer already exists; a crossed or replayed
    /// offer must not tear it down.
    IgnoreDuplicate,
}

/// What to do with an inbound answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerVerdict {
    Apply,
    /// No link in `OfferSent` is waiting for this answer.
    IgnoreUnexpected,
}

/// What to do with an inbound ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateVerdict {
    /// Remote description is committed, apply directly.
    Apply,
    /// No remote description yet: hold in arrival order, flush after
    /// the description is set. Applying early is an error; dropping
    /// would lose a path.
    Queue,
    /// No link for this peer (e.g. it already left); drop quietly.
    DropWithoutLink,
}

/// The initiation-policy half of the engine: who connects to whom.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationEngine {
    local_id: Uuid,
    role: ParticipantRole,
}

impl NegotiationEngine {
    pub fn new(local_id: Uuid, role: ParticipantRole) -> Self {
        Self { local_id, role }
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    /// Asymmetric initiation: only a host originates offers, and only
    /// toward peers it has no link with yet. Callers run this as a
    /// full pass over the roster, not just for the peer that
    /// triggered a join, so a late-joining host reaches everyone.
    pub fn should_initiate(&self, remote_id: Uuid, has_link: bool) -> bool {
        self.role.initiates() && remote_id != self.local_id && !has_link
    }

    pub fn on_offer(&self, existing: Option<NegotiationState>) -> OfferVerdict {
        if self.role.initiates() {
            return OfferVerdict::IgnoreInitiatorRole;
        }
        match existing {
            None | Some(NegotiationState::Idle) => OfferVerdict::Answer,
            Some(_) => OfferVerdict::IgnoreDuplicate,
        }
    }

    pub fn on_answer(&self, existing: Option<NegotiationState>) -> AnswerVerdict {
        match existing {
            Some(NegotiationState::OfferSent) => AnswerVerdict::Apply,
            _ => AnswerVerdict::IgnoreUnexpected,
        }
    }

    pub fn on_candidate(
        &self,
        link_exists: bool,
        remote_description_set: bool,
    ) -> CandidateVerdict {
        if !link_exists {
            CandidateVerdict::DropWithoutLink
        } else if remote_description_set {
            CandidateVerdict::Apply
        } else {
            CandidateVerdict::Queue
        }
    }
}

/// Map a transport connection-state signal onto the negotiation state
/// machine. Returns the new state, or `None` when the signal does not
/// move the machine (e.g. `connecting` while an offer is in flight).
///
/// `failed` only flags the link as `Reconnecting`; the baseline does
/// not renegotiate automatically.
pub fn on_transport_state(
    current: NegotiationState,
    transport: RTCPeerConnectionState,
) -> Option<NegotiationState> {
    match transport {
        RTCPeerConnectionState::Connected => Some(NegotiationState::Connected),
        RTCPeerConnectionState::Failed => Some(NegotiationState::Reconnecting),
        RTCPeerConnectionState::Closed => Some(NegotiationState::Closed),
        RTCPeerConnectionState::Disconnected if current == NegotiationState::Connected => {
            Some(NegotiationState::Reconnecting)
        }
        _ => None,
    }
}
