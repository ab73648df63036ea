//! Multi-party WebRTC session orchestration for live tutoring rooms.
//!
//! The crate wires four concerns together: a reconnecting WebSocket
//! signaling channel, a roster tracker, a per-peer negotiation engine
//! with its link table, and local media (camera/mic, screen share,
//! host-side recording). One [`session::SessionRunner`] task owns all
//! of it and consumes a single event queue.

pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod recording;
pub mod roster;
pub mod session;
pub mod signaling;

pub use config::SessionConfig;
pub use error::{MediaError, Result, SessionError};
pub use media::{MediaDevices, MediaSource, MediaState, TrackSet};
pub use negotiation::{NegotiationEngine, NegotiationState};
pub use recording::{Recording, RecordingSink};
pub use roster::MembershipTracker;
pub use session::{
    launch, LocalIdentity, SessionCommand, SessionEvent, SessionHandle, SessionRunner,
};
pub use signaling::{ChannelConfig, ChannelState, SignalingChannel, SignalingEvent, SignalingSender};
