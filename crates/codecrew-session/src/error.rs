use thiserror::Error;

/// Why acquiring local media failed.
///
/// These are the only failures surfaced to the user as a blocking
/// interruption: the session is unusable without media.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera/microphone permission denied")]
    Denied,

    #[error("no camera or microphone present")]
    NoDevice,

    #[error("media capture not supported on this platform")]
    Unsupported,
}

/// Orchestrator error taxonomy.
///
/// Transport and negotiation failures are recovered or contained
/// internally (reconnect, link state) and only reach this type when a
/// caller-requested operation cannot proceed at all.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("signaling channel unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("negotiation with {remote_id} failed: {reason}")]
    NegotiationFailed {
        remote_id: uuid::Uuid,
        reason: String,
    },

    #[error("only the host may start a recording")]
    RecordingForbidden,

    #[error("recording already in progress")]
    RecordingActive,

    #[error("no recording in progress")]
    RecordingInactive,

    #[error("screen share already active")]
    ScreenShareActive,

    #[error("local media has not been acquired yet")]
    MediaNotReady,

    #[error("session has already been closed")]
    SessionClosed,

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error("session metadata request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
