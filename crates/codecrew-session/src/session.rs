//! The session orchestrator: one task that owns the peer-link table
//! and reacts to every event in the system.
//!
//! All mutation happens serially inside [`SessionRunner`]: signaling
//! messages, channel state changes, transport callbacks, trickled
//! local candidates, screen-share end signals and user commands are
//! funneled onto one queue, so the link table needs no locking — only
//! careful event ordering.

use std::collections::HashMap;

use chrono::Utc;
use codecrew_protocol::{ParticipantInfo, SignalingMessage};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::media::MediaSource;
use crate::negotiation::{
    on_transport_state, AnswerVerdict, CandidateVerdict, NegotiationEngine, NegotiationState,
    OfferVerdict,
};
use crate::peer::{LinkEvent, LinkEventKind, PeerLink};
use crate::recording::{Recording, RecordingSink};
use crate::roster::MembershipTracker;
use crate::signaling::{ChannelState, SignalingChannel, SignalingEvent, SignalingSender};

pub use codecrew_protocol::ParticipantRole;

/// Who we are inside the session.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: Uuid,
    pub user_name: String,
    pub role: ParticipantRole,
}

/// Everything the runner reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Signaling(SignalingEvent),
    Link(LinkEvent),
    /// A user command, queued behind whatever events are in flight.
    Command(SessionCommand),
    /// Screen capture ended outside the app (OS/browser chrome).
    ScreenShareEnded,
    /// Diagnostic timer: a link has been up this long without
    /// reaching `Connected`. Observational only, no hard timeout.
    LinkStillConnecting { remote_id: Uuid },
}

/// User commands, serialized onto the session queue so they interleave
/// with signaling and transport events instead of racing them.
#[derive(Debug)]
pub enum SessionCommand {
    ToggleVideo,
    ToggleAudio,
    StartScreenShare,
    StopScreenShare,
    StartRecording(oneshot::Sender<Result<()>>),
    PushRecordingChunk(Vec<u8>),
    StopRecording(oneshot::Sender<Result<Recording>>),
    SendChat(String),
    Leave,
}

/// Cloneable front door to a running session. While [`SessionRunner::run`]
/// owns the runner, this is how the application issues commands.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    fn command(&self, command: SessionCommand) {
        if self.events.send(SessionEvent::Command(command)).is_err() {
            tracing::warn!("dropping command: session already closed");
        }
    }

    pub fn toggle_video(&self) {
        self.command(SessionCommand::ToggleVideo);
    }

    pub fn toggle_audio(&self) {
        self.command(SessionCommand::ToggleAudio);
    }

    pub fn start_screen_share(&self) {
        self.command(SessionCommand::StartScreenShare);
    }

    pub fn stop_screen_share(&self) {
        self.command(SessionCommand::StopScreenShare);
    }

    pub async fn start_recording(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(SessionCommand::StartRecording(reply_tx));
        reply_rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub fn push_recording_chunk(&self, chunk: Vec<u8>) {
        self.command(SessionCommand::PushRecordingChunk(chunk));
    }

    pub async fn stop_recording(&self) -> Result<Recording> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(SessionCommand::StopRecording(reply_tx));
        reply_rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub fn send_chat(&self, message: String) {
        self.command(SessionCommand::SendChat(message));
    }

    /// Queue session exit: announce leave, close links, release media,
    /// close the channel, end the run loop.
    pub fn leave(&self) {
        self.command(SessionCommand::Leave);
    }
}

pub struct SessionRunner {
    session_id: Uuid,
    local: LocalIdentity,
    config: SessionConfig,
    engine: NegotiationEngine,
    roster: MembershipTracker,
    links: HashMap<Uuid, PeerLink>,
    media: MediaSource,
    recorder: RecordingSink,
    outbound: SignalingSender,
    channel: Option<SignalingChannel>,
    channel_state: ChannelState,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    relay_tx: Option<mpsc::UnboundedSender<SignalingMessage>>,
    closed: bool,
}

impl SessionRunner {
    pub fn new(
        session_id: Uuid,
        local: LocalIdentity,
        config: SessionConfig,
        media: MediaSource,
        outbound: SignalingSender,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_tx, mut link_rx) = mpsc::unbounded_channel::<LinkEvent>();

        // Transport callbacks fire on webrtc's internal tasks; merge
        // them onto the single session queue.
        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                if forward.send(SessionEvent::Link(event)).is_err() {
                    break;
                }
            }
        });

        Self {
            session_id,
            engine: NegotiationEngine::new(local.user_id, local.role),
            roster: MembershipTracker::new(local.user_id),
            links: HashMap::new(),
            recorder: RecordingSink::new(session_id),
            local,
            config,
            media,
            outbound,
            channel: None,
            channel_state: ChannelState::Connecting,
            events_tx,
            events_rx: Some(events_rx),
            link_tx,
            relay_tx: None,
            closed: false,
        }
    }

    /// Hand the runner the channel handle so session exit can close
    /// it after the links are torn down.
    pub fn attach_channel(&mut self, channel: SignalingChannel) {
        self.channel = Some(channel);
    }

    /// Sender half of the session queue, for wiring inbound signaling
    /// events and auxiliary timers into the runner.
    pub fn events_sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events_tx.clone()
    }

    /// Command handle for the application, valid for the lifetime of
    /// the run loop.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Chat and whiteboard relay traffic, decoded and passed through
    /// to the embedding application.
    pub fn subscribe_relay(&mut self) -> mpsc::UnboundedReceiver<SignalingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.relay_tx = Some(tx);
        rx
    }

    // Queries.

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn roster(&self) -> &MembershipTracker {
        &self.roster
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    pub fn has_link(&self, remote_id: Uuid) -> bool {
        self.links.contains_key(&remote_id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn negotiation_state(&self, remote_id: Uuid) -> Option<NegotiationState> {
        self.links.get(&remote_id).map(|l| l.state())
    }

    pub fn pending_candidates(&self, remote_id: Uuid) -> usize {
        self.links
            .get(&remote_id)
            .map(|l| l.pending_candidates())
            .unwrap_or(0)
    }

    pub fn media(&self) -> &MediaSource {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut MediaSource {
        &mut self.media
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drive the session until it leaves or every event source is
    /// gone.
    pub async fn run(&mut self) {
        let mut events = match self.events_rx.take() {
            Some(rx) => rx,
            None => return,
        };
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.closed {
                break;
            }
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Signaling(SignalingEvent::State(state)) => {
                self.handle_channel_state(state)
            }
            SessionEvent::Signaling(SignalingEvent::Message(message)) => {
                self.handle_message(message).await
            }
            SessionEvent::Link(LinkEvent { remote_id, kind }) => match kind {
                LinkEventKind::LocalCandidate(candidate) => {
                    // Trickle: forward each candidate as discovered.
                    self.outbound.send(SignalingMessage::IceCandidate {
                        candidate,
                        target_user_id: Some(remote_id),
                        from_user_id: None,
                    });
                }
                LinkEventKind::StateChanged(transport) => {
                    self.handle_transport_state(remote_id, transport).await
                }
            },
            SessionEvent::Command(command) => self.handle_command(command).await,
            SessionEvent::ScreenShareEnded => {
                tracing::info!("screen share ended from browser/OS chrome");
                if let Err(e) = self.stop_screen_share().await {
                    tracing::warn!("failed to stop screen share: {e}");
                }
            }
            SessionEvent::LinkStillConnecting { remote_id } => {
                if let Some(state) = self.negotiation_state(remote_id) {
                    if !matches!(state, NegotiationState::Connected | NegotiationState::Closed) {
                        tracing::warn!(
                            %remote_id,
                            ?state,
                            "link still connecting after {:?}",
                            self.config.connect_warn_after()
                        );
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ToggleVideo => {
                self.toggle_video();
            }
            SessionCommand::ToggleAudio => {
                self.toggle_audio();
            }
            SessionCommand::StartScreenShare => {
                if let Err(e) = self.start_screen_share().await {
                    tracing::warn!("screen share failed: {e}");
                }
            }
            SessionCommand::StopScreenShare => {
                if let Err(e) = self.stop_screen_share().await {
                    tracing::warn!("failed to stop screen share: {e}");
                }
            }
            SessionCommand::StartRecording(reply) => {
                let _ = reply.send(self.start_recording());
            }
            SessionCommand::PushRecordingChunk(chunk) => self.push_recording_chunk(chunk),
            SessionCommand::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording());
            }
            SessionCommand::SendChat(message) => self.send_chat(message),
            SessionCommand::Leave => self.leave().await,
        }
    }

    fn handle_channel_state(&mut self, state: ChannelState) {
        self.channel_state = state;
        match state {
            ChannelState::Open => {
                // Each open is a new logical connection; the relay
                // holds no affinity, so always re-announce.
                self.outbound.send(SignalingMessage::Join {
                    session_id: self.session_id,
                    user_id: self.local.user_id,
                    user_name: self.local.user_name.clone(),
                    role: self.local.role,
                });
            }
            ChannelState::Closed => {
                if !self.closed {
                    tracing::warn!("signaling channel lost, roster invalidated");
                    self.roster.clear();
                }
            }
            ChannelState::Connecting => {}
        }
    }

    async fn handle_message(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Join {
                user_id,
                user_name,
                role,
                ..
            } => {
                let newly_joined = self
                    .roster
                    .apply_join(ParticipantInfo {
                        user_id,
                        user_name,
                        role,
                    })
                    .is_some();
                if newly_joined {
                    tracing::info!(%user_id, "participant joined");
                    if self.engine.should_initiate(user_id, self.has_link(user_id)) {
                        self.initiate_link(user_id).await;
                    }
                }
            }
            SignalingMessage::Leave { user_id } => {
                if let Some(participant) = self.roster.apply_leave(user_id) {
                    tracing::info!(%user_id, name = %participant.user_name, "participant left");
                }
                // Close and remove in the same event turn; a late
                // candidate for this peer is then dropped quietly.
                if let Some(mut link) = self.links.remove(&user_id) {
                    link.close().await;
                }
            }
            SignalingMessage::ParticipantsList { participants } => {
                self.roster.replace_all(participants);
                // Membership discovery is a full pass over the
                // snapshot, not edge-triggered: a late-joining host
                // must reach attendees that were already present.
                let candidates: Vec<Uuid> = self
                    .roster
                    .remote_participants()
                    .map(|p| p.user_id)
                    .collect();
                for remote_id in candidates {
                    if self.engine.should_initiate(remote_id, self.has_link(remote_id)) {
                        self.initiate_link(remote_id).await;
                    }
                }
            }
            SignalingMessage::Offer {
                offer,
                from_user_id,
                ..
            } => {
                let Some(from) = from_user_id else {
                    tracing::warn!("dropping offer without sender id");
                    return;
                };
                match self.engine.on_offer(self.negotiation_state(from)) {
                    OfferVerdict::Answer => self.answer_offer(from, offer).await,
                    OfferVerdict::IgnoreInitiatorRole => {
                        tracing::debug!(%from, "ignoring offer: local role initiates")
                    }
                    OfferVerdict::IgnoreDuplicate => {
                        tracing::debug!(%from, "ignoring offer: link already exists")
                    }
                }
            }
            SignalingMessage::Answer {
                answer,
                from_user_id,
                ..
            } => {
                let Some(from) = from_user_id else {
                    tracing::warn!("dropping answer without sender id");
                    return;
                };
                match self.engine.on_answer(self.negotiation_state(from)) {
                    AnswerVerdict::Apply => {
                        if let Some(link) = self.links.get_mut(&from) {
                            if let Err(e) = link.apply_answer(&answer).await {
                                tracing::warn!(%from, "failed to apply answer: {e}");
                            }
                        }
                    }
                    AnswerVerdict::IgnoreUnexpected => {
                        tracing::debug!(%from, "ignoring unexpected answer")
                    }
                }
            }
            SignalingMessage::IceCandidate {
                candidate,
                from_user_id,
                ..
            } => {
                let Some(from) = from_user_id else {
                    tracing::warn!("dropping candidate without sender id");
                    return;
                };
                let has_description = match self.links.get(&from) {
                    Some(link) => link.has_remote_description().await,
                    None => false,
                };
                match self
                    .engine
                    .on_candidate(self.has_link(from), has_description)
                {
                    CandidateVerdict::Apply => {
                        if let Some(link) = self.links.get(&from) {
                            if let Err(e) = link.apply_candidate(candidate).await {
                                tracing::warn!(%from, "candidate rejected: {e}");
                            }
                        }
                    }
                    CandidateVerdict::Queue => {
                        if let Some(link) = self.links.get_mut(&from) {
                            link.queue_candidate(candidate);
                        }
                    }
                    CandidateVerdict::DropWithoutLink => {
                        tracing::debug!(%from, "dropping candidate: no link (peer gone?)")
                    }
                }
            }
            relayed @ (SignalingMessage::ChatMessage { .. }
            | SignalingMessage::WhiteboardDraw { .. }
            | SignalingMessage::WhiteboardClear) => {
                if let Some(tx) = &self.relay_tx {
                    let _ = tx.send(relayed);
                }
            }
        }
    }

    /// Host side: create a link, attach tracks, send the offer.
    async fn initiate_link(&mut self, remote_id: Uuid) {
        let tracks = match self.media.outgoing_tracks() {
            Ok(tracks) => tracks,
            Err(SessionError::MediaNotReady) => {
                tracing::warn!(%remote_id, "cannot offer yet: local media not acquired");
                return;
            }
            Err(e) => {
                tracing::warn!(%remote_id, "cannot offer: {e}");
                return;
            }
        };

        let mut link = match PeerLink::new(
            remote_id,
            self.config.rtc_ice_servers(),
            &tracks,
            self.link_tx.clone(),
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(%remote_id, "failed to create peer link: {e}");
                return;
            }
        };

        match link.start_offer().await {
            Ok(offer) => {
                self.outbound.send(SignalingMessage::Offer {
                    offer,
                    target_user_id: Some(remote_id),
                    from_user_id: None,
                });
                self.spawn_connect_diagnostic(remote_id);
                self.links.insert(remote_id, link);
            }
            Err(e) => {
                tracing::error!(%remote_id, "failed to create offer: {e}");
                link.close().await;
            }
        }
    }

    /// Attendee side: answer an inbound offer.
    async fn answer_offer(&mut self, from: Uuid, offer: codecrew_protocol::SessionDescription) {
        let tracks = match self.media.outgoing_tracks() {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!(%from, "cannot answer offer: {e}");
                return;
            }
        };

        let mut link = match PeerLink::new(
            from,
            self.config.rtc_ice_servers(),
            &tracks,
            self.link_tx.clone(),
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(%from, "failed to create peer link: {e}");
                return;
            }
        };

        match link.accept_offer(&offer).await {
            Ok(answer) => {
                self.outbound.send(SignalingMessage::Answer {
                    answer,
                    target_user_id: Some(from),
                    from_user_id: None,
                });
                self.spawn_connect_diagnostic(from);
                self.links.insert(from, link);
            }
            Err(e) => {
                tracing::error!(%from, "failed to answer offer: {e}");
                link.close().await;
            }
        }
    }

    fn spawn_connect_diagnostic(&self, remote_id: Uuid) {
        let events = self.events_tx.clone();
        let after = self.config.connect_warn_after();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(SessionEvent::LinkStillConnecting { remote_id });
        });
    }

    async fn handle_transport_state(
        &mut self,
        remote_id: Uuid,
        transport: webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState,
    ) {
        let Some(link) = self.links.get_mut(&remote_id) else {
            return;
        };
        let Some(next) = on_transport_state(link.state(), transport) else {
            return;
        };
        match next {
            NegotiationState::Connected => {
                tracing::info!(%remote_id, "peer link established");
                link.set_state(next);
            }
            NegotiationState::Reconnecting => {
                // Baseline policy: observe and flag only, no
                // automatic renegotiation.
                tracing::warn!(%remote_id, "peer link failed, flagged for reconnection");
                link.set_state(next);
            }
            NegotiationState::Closed => {
                link.set_state(next);
                if let Some(mut link) = self.links.remove(&remote_id) {
                    link.close().await;
                }
            }
            other => link.set_state(other),
        }
    }

    // User commands. These run on the same task as event handling, so
    // they interleave with events at await points only.

    pub fn toggle_video(&mut self) -> bool {
        self.media.toggle_video()
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.media.toggle_audio()
    }

    /// Switch the outgoing video from camera to screen on every
    /// existing link, in place. No renegotiation, no new offers, and
    /// no negotiation-state change on any link.
    pub async fn start_screen_share(&mut self) -> Result<()> {
        let (tracks, ended) = self.media.start_screen_share().await?;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if ended.await.is_ok() {
                let _ = events.send(SessionEvent::ScreenShareEnded);
            }
        });
        self.rebind_all(&tracks).await;
        Ok(())
    }

    pub async fn stop_screen_share(&mut self) -> Result<()> {
        if let Some(tracks) = self.media.stop_screen_share()? {
            self.rebind_all(&tracks).await;
        }
        Ok(())
    }

    async fn rebind_all(&mut self, tracks: &crate::media::TrackSet) {
        for link in self.links.values() {
            if let Err(e) = link.rebind_tracks(tracks).await {
                tracing::warn!(remote_id = %link.remote_id(), "track rebind failed: {e}");
            }
        }
    }

    /// Only the host records; recording covers the local outgoing
    /// media only.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.local.role != ParticipantRole::Host {
            return Err(SessionError::RecordingForbidden);
        }
        self.recorder.start()
    }

    pub fn push_recording_chunk(&mut self, chunk: Vec<u8>) {
        self.recorder.push_chunk(chunk);
    }

    pub fn stop_recording(&mut self) -> Result<Recording> {
        self.recorder.stop()
    }

    pub fn send_chat(&self, message: String) {
        self.outbound.send(SignalingMessage::ChatMessage {
            user_id: self.local.user_id,
            user_name: self.local.user_name.clone(),
            message,
            timestamp: Utc::now(),
        });
    }

    /// Exit the session: announce the leave while the channel is
    /// still up, then close every link, release local media, and
    /// finally close the channel.
    pub async fn leave(&mut self) {
        self.outbound.send(SignalingMessage::Leave {
            user_id: self.local.user_id,
        });

        let remote_ids: Vec<Uuid> = self.links.keys().copied().collect();
        for remote_id in remote_ids {
            if let Some(mut link) = self.links.remove(&remote_id) {
                link.close().await;
            }
        }

        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.stop() {
                tracing::warn!("failed to finalize recording on exit: {e}");
            }
        }

        let _ = self.media.stop_screen_share();
        self.media.release();

        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.closed = true;
        tracing::info!(session_id = %self.session_id, "left session");
    }
}

/// Connect the signaling channel, build the runner, and wire inbound
/// events onto its queue. The caller drives `runner.run()`.
pub fn launch(
    session_id: Uuid,
    local: LocalIdentity,
    config: SessionConfig,
    media: MediaSource,
    token: &str,
) -> SessionRunner {
    let channel_config = crate::signaling::ChannelConfig::for_session(
        &config.signaling_url,
        session_id,
        token,
    )
    .with_backoff(config.reconnect_backoff());
    let (channel, mut signaling_rx) = SignalingChannel::connect(channel_config);

    let mut runner = SessionRunner::new(session_id, local, config, media, channel.sender());
    runner.attach_channel(channel);

    let events = runner.events_sender();
    tokio::spawn(async move {
        while let Some(event) = signaling_rx.recv().await {
            if events.send(SessionEvent::Signaling(event)).is_err() {
                break;
            }
        }
    });

    runner
}
