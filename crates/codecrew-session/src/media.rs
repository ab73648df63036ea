//! Local media ownership: capture permission lifecycle, the active
//! outgoing track set, mute flags, and screen-share substitution.
//!
//! `MediaSource` exclusively owns the local tracks; peer links only
//! ever hold senders bound to them. Device access itself sits behind
//! [`MediaDevices`] since platform capture APIs are not part of the
//! orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{MediaError, Result, SessionError};

/// Camera plus microphone tracks, acquired on permission grant.
pub struct UserMedia {
    pub video: Arc<TrackLocalStaticSample>,
    pub audio: Arc<TrackLocalStaticSample>,
}

/// A display capture: screen video, optional system audio, and a
/// signal that fires when capture is ended outside the app (browser
/// chrome / OS picker). That end must be handled exactly like an
/// explicit stop.
pub struct DisplayMedia {
    pub video: Arc<TrackLocalStaticSample>,
    pub audio: Option<Arc<TrackLocalStaticSample>>,
    pub ended: oneshot::Receiver<()>,
}

/// Seam to the platform capture layer.
///
/// Implementations pump frames into the tracks they hand over. Mute
/// is not part of this trait: the pump polls
/// [`MediaSource::state`] and withholds frames for a muted kind
/// instead of touching tracks or senders.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self) -> std::result::Result<UserMedia, MediaError>;
    async fn display_media(&self) -> std::result::Result<DisplayMedia, MediaError>;
}

/// The outgoing track set currently attached to every peer link:
/// camera+mic, or screen(+audio) while sharing.
#[derive(Clone)]
pub struct TrackSet {
    pub video: Arc<TrackLocalStaticSample>,
    pub audio: Arc<TrackLocalStaticSample>,
}

/// Snapshot of the local media flags for the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub sharing_screen: bool,
}

pub struct MediaSource {
    devices: Arc<dyn MediaDevices>,
    camera: Option<Arc<TrackLocalStaticSample>>,
    mic: Option<Arc<TrackLocalStaticSample>>,
    screen: Option<Arc<TrackLocalStaticSample>>,
    screen_audio: Option<Arc<TrackLocalStaticSample>>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl MediaSource {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            camera: None,
            mic: None,
            screen: None,
            screen_audio: None,
            video_enabled: true,
            audio_enabled: true,
        }
    }

    /// Prompt for camera/microphone access and take ownership of the
    /// resulting tracks. Permission failures are surfaced, never
    /// retried automatically.
    pub async fn request_permission(&mut self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        let media = self.devices.user_media().await?;
        tracing::info!("camera and microphone acquired");
        self.camera = Some(media.video);
        self.mic = Some(media.audio);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.camera.is_some() && self.mic.is_some()
    }

    pub fn sharing_screen(&self) -> bool {
        self.screen.is_some()
    }

    pub fn state(&self) -> MediaState {
        MediaState {
            video_enabled: self.video_enabled,
            audio_enabled: self.audio_enabled,
            sharing_screen: self.sharing_screen(),
        }
    }

    /// The track set that should currently feed every peer link.
    pub fn outgoing_tracks(&self) -> Result<TrackSet> {
        let (camera, mic) = match (&self.camera, &self.mic) {
            (Some(c), Some(m)) => (c, m),
            _ => return Err(SessionError::MediaNotReady),
        };
        match &self.screen {
            Some(screen) => Ok(TrackSet {
                video: screen.clone(),
                // No system audio in the capture: keep the microphone.
                audio: self.screen_audio.clone().unwrap_or_else(|| mic.clone()),
            }),
            None => Ok(TrackSet {
                video: camera.clone(),
                audio: mic.clone(),
            }),
        }
    }

    /// Flip the video mute flag. The capture pump reads the flag via
    /// [`MediaSource::state`]; senders stay bound and nothing is
    /// renegotiated.
    pub fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        self.video_enabled
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.audio_enabled = !self.audio_enabled;
        self.audio_enabled
    }

    /// Acquire a display capture and switch the outgoing video to it.
    ///
    /// Returns the new track set to rebind on every link, plus the
    /// capture's end signal (fires when sharing is stopped from the
    /// OS/browser chrome rather than the in-app control).
    pub async fn start_screen_share(&mut self) -> Result<(TrackSet, oneshot::Receiver<()>)> {
        if !self.is_ready() {
            return Err(SessionError::MediaNotReady);
        }
        if self.sharing_screen() {
            return Err(SessionError::ScreenShareActive);
        }
        let display = self.devices.display_media().await?;
        let has_system_audio = display.audio.is_some();
        tracing::info!(has_system_audio, "screen capture acquired");
        self.screen = Some(display.video);
        self.screen_audio = display.audio;
        Ok((self.outgoing_tracks()?, display.ended))
    }

    /// Release the display capture and switch back to camera+mic.
    /// Returns the restored track set to rebind, or `None` when no
    /// share was active (a chrome-initiated end may race the in-app
    /// stop).
    pub fn stop_screen_share(&mut self) -> Result<Option<TrackSet>> {
        if self.screen.take().is_none() {
            return Ok(None);
        }
        self.screen_audio = None;
        tracing::info!("screen share stopped, restoring camera");
        Ok(Some(self.outgoing_tracks()?))
    }

    /// Drop every owned track. Called on session exit, after all peer
    /// links are closed.
    pub fn release(&mut self) {
        self.camera = None;
        self.mic = None;
        self.screen = None;
        self.screen_audio = None;
    }
}
