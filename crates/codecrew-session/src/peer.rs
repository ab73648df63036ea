//! One negotiation state machine per remote participant.
//!
//! A `PeerLink` exclusively owns its `RTCPeerConnection`. It performs
//! the WebRTC half of what the engine decides: description exchange,
//! candidate application (with the before-description queue), in-place
//! track substitution, teardown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use codecrew_protocol::{IceCandidateData, SdpType, SessionDescription};
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use crate::error::Result;
use crate::media::TrackSet;
use crate::negotiation::NegotiationState;

/// Logical kind of an outgoing sender binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Asynchronous signal from a link's underlying transport, delivered
/// onto the session event queue.
#[derive(Debug)]
pub struct LinkEvent {
    pub remote_id: Uuid,
    pub kind: LinkEventKind,
}

#[derive(Debug)]
pub enum LinkEventKind {
    /// A locally-discovered ICE candidate to trickle to the peer.
    LocalCandidate(IceCandidateData),
    /// Transport connection-state change.
    StateChanged(RTCPeerConnectionState),
}

pub struct PeerLink {
    remote_id: Uuid,
    connection: Arc<RTCPeerConnection>,
    state: NegotiationState,
    /// Candidates received before the remote description existed,
    /// held in arrival order.
    pending_remote_candidates: VecDeque<IceCandidateData>,
    senders: HashMap<TrackKind, Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>>,
}

impl PeerLink {
    /// Create the underlying connection, attach the current outgoing
    /// track set, and wire transport callbacks onto `events`.
    pub async fn new(
        remote_id: Uuid,
        ice_servers: Vec<RTCIceServer>,
        tracks: &TrackSet,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(config).await?);

        let mut senders = HashMap::new();
        let video_sender = connection
            .add_track(tracks.video.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        senders.insert(TrackKind::Video, video_sender);
        let audio_sender = connection
            .add_track(tracks.audio.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        senders.insert(TrackKind::Audio, audio_sender);

        let ice_tx = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(json) => {
                            let _ = tx.send(LinkEvent {
                                remote_id,
                                kind: LinkEventKind::LocalCandidate(IceCandidateData {
                                    candidate: json.candidate,
                                    sdp_mid: json.sdp_mid,
                                    sdp_mline_index: json.sdp_mline_index,
                                }),
                            });
                        }
                        Err(e) => tracing::warn!("failed to serialize local candidate: {e}"),
                    }
                }
            })
        }));

        let state_tx = events;
        connection.on_peer_connection_state_change(Box::new(move |state| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let _ = tx.send(LinkEvent {
                    remote_id,
                    kind: LinkEventKind::StateChanged(state),
                });
            })
        }));

        Ok(Self {
            remote_id,
            connection,
            state: NegotiationState::Idle,
            pending_remote_candidates: VecDeque::new(),
            senders,
        })
    }

    pub fn remote_id(&self) -> Uuid {
        self.remote_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            tracing::debug!(remote_id = %self.remote_id, ?state, "link state");
            self.state = state;
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_remote_candidates.len()
    }

    /// Initiator side: create and commit a local offer. ICE discovery
    /// starts once the local description is set; candidates arrive
    /// trickled via [`LinkEventKind::LocalCandidate`].
    pub async fn start_offer(&mut self) -> Result<SessionDescription> {
        self.set_state(NegotiationState::OfferCreating);
        let offer = self.connection.create_offer(None).await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.set_state(NegotiationState::OfferSent);
        Ok(SessionDescription {
            kind: SdpType::Offer,
            sdp: offer.sdp,
        })
    }

    /// Answering side: commit the remote offer and produce an answer.
    pub async fn accept_offer(&mut self, offer: &SessionDescription) -> Result<SessionDescription> {
        let remote = RTCSessionDescription::offer(offer.sdp.clone())?;
        self.connection.set_remote_description(remote).await?;
        self.flush_pending_candidates().await;

        self.set_state(NegotiationState::AnswerCreating);
        let answer = self.connection.create_answer(None).await?;
        self.connection
            .set_local_description(answer.clone())
            .await?;
        self.set_state(NegotiationState::AnswerSent);
        Ok(SessionDescription {
            kind: SdpType::Answer,
            sdp: answer.sdp,
        })
    }

    /// Initiator side: commit the peer's answer. The link stays in
    /// `OfferSent` until the transport reports established.
    pub async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()> {
        let remote = RTCSessionDescription::answer(answer.sdp.clone())?;
        self.connection.set_remote_description(remote).await?;
        self.flush_pending_candidates().await;
        Ok(())
    }

    pub async fn has_remote_description(&self) -> bool {
        self.connection.remote_description().await.is_some()
    }

    /// Hold a candidate that arrived before the remote description.
    pub fn queue_candidate(&mut self, candidate: IceCandidateData) {
        self.pending_remote_candidates.push_back(candidate);
    }

    pub async fn apply_candidate(&self, candidate: IceCandidateData) -> Result<()> {
        self.connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Apply queued candidates in their original arrival order. Must
    /// only run once a remote description is committed.
    async fn flush_pending_candidates(&mut self) {
        while let Some(candidate) = self.pending_remote_candidates.pop_front() {
            if let Err(e) = self.apply_candidate(candidate).await {
                tracing::warn!(remote_id = %self.remote_id, "queued candidate rejected: {e}");
            }
        }
    }

    /// Substitute the outgoing track of one kind in place on the live
    /// connection. Same-kind replacement needs no renegotiation and
    /// must not disturb `state`.
    pub async fn replace_track(
        &self,
        kind: TrackKind,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<()> {
        if let Some(sender) = self.senders.get(&kind) {
            sender.replace_track(Some(track)).await?;
        }
        Ok(())
    }

    /// Rebind both senders to a new outgoing track set.
    pub async fn rebind_tracks(&self, tracks: &TrackSet) -> Result<()> {
        self.replace_track(TrackKind::Video, tracks.video.clone()).await?;
        self.replace_track(TrackKind::Audio, tracks.audio.clone()).await?;
        Ok(())
    }

    /// Close the underlying connection and mark the link dead.
    pub async fn close(&mut self) {
        self.set_state(NegotiationState::Closed);
        if let Err(e) = self.connection.close().await {
            tracing::warn!(remote_id = %self.remote_id, "error closing connection: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    fn track_set() -> TrackSet {
        TrackSet {
            video: Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    ..Default::default()
                },
                "video".to_string(),
                "stream-local".to_string(),
            )),
            audio: Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    ..Default::default()
                },
                "audio".to_string(),
                "stream-local".to_string(),
            )),
        }
    }

    async fn link(id: u128, events: &mpsc::UnboundedSender<LinkEvent>) -> PeerLink {
        PeerLink::new(Uuid::from_u128(id), vec![], &track_set(), events.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn offer_answer_handshake() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut initiator = link(2, &tx).await;
        let mut answerer = link(1, &tx).await;

        let offer = initiator.start_offer().await.unwrap();
        assert_eq!(initiator.state(), NegotiationState::OfferSent);
        assert_eq!(offer.kind, SdpType::Offer);

        let answer = answerer.accept_offer(&offer).await.unwrap();
        assert_eq!(answerer.state(), NegotiationState::AnswerSent);

        initiator.apply_answer(&answer).await.unwrap();
        assert!(initiator.has_remote_description().await);

        initiator.close().await;
        answerer.close().await;
    }

    fn host_candidate(port: u16) -> IceCandidateData {
        IceCandidateData {
            candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {port} typ host"),
            sdp_mid: None,
            sdp_mline_index: Some(0),
        }
    }

    #[tokio::test]
    async fn early_candidates_queue_in_arrival_order_and_flush_together() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut initiator = link(2, &tx).await;
        let mut answerer = link(1, &tx).await;

        let offer = initiator.start_offer().await.unwrap();

        // Candidates land before the answer: all held, none applied.
        initiator.queue_candidate(host_candidate(50_001));
        initiator.queue_candidate(host_candidate(50_002));
        initiator.queue_candidate(host_candidate(50_003));
        assert_eq!(initiator.pending_candidates(), 3);
        assert!(!initiator.has_remote_description().await);

        // The queue preserves arrival order; the flush drains it from
        // the front.
        let queued: Vec<_> = initiator
            .pending_remote_candidates
            .iter()
            .map(|c| c.candidate.clone())
            .collect();
        assert!(queued[0].contains("50001"));
        assert!(queued[1].contains("50002"));
        assert!(queued[2].contains("50003"));

        let answer = answerer.accept_offer(&offer).await.unwrap();
        initiator.apply_answer(&answer).await.unwrap();
        assert_eq!(initiator.pending_candidates(), 0);

        initiator.close().await;
        answerer.close().await;
    }

    #[tokio::test]
    async fn rebind_keeps_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = link(2, &tx).await;
        link.start_offer().await.unwrap();

        let replacement = track_set();
        link.rebind_tracks(&replacement).await.unwrap();
        assert_eq!(link.state(), NegotiationState::OfferSent);

        link.close().await;
    }
}
