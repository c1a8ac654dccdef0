//! One negotiated connection per remote participant

use crate::config::SessionConfig;
use crate::media::LocalMediaSet;
use crate::peer::PeerEvent;
use crate::signaling::{IceCandidate, SignalPayload};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Negotiation state of one peer link
///
/// `Closed` is terminal and reachable from every state. Track
/// replacement never moves this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no description exchanged yet
    New,
    /// Local offer sent, awaiting the answer
    OfferSent,
    /// Remote offer applied, answer being generated
    OfferReceived,
    /// Both descriptions in place, transport connecting
    AnswerExchanged,
    /// Transport established
    Connected,
    /// Torn down; every further negotiation step is a no-op
    Closed,
}

/// One managed connection state machine between the local session and
/// one remote participant
pub struct PeerLink {
    /// Remote participant identifier
    participant_id: String,

    /// Unique identifier for this link instance
    link_id: String,

    /// Negotiation state
    state: Arc<RwLock<LinkState>>,

    /// Underlying WebRTC peer connection
    pc: Arc<RTCPeerConnection>,

    /// Remote candidates held until the remote description exists,
    /// applied in arrival order
    pending_candidates: Mutex<Vec<IceCandidate>>,

    /// Serializes negotiation steps for this link; steps for different
    /// links interleave freely
    negotiation: Mutex<()>,

    /// Outbound audio sender (retained for track replacement)
    audio_sender: RwLock<Option<Arc<RTCRtpSender>>>,

    /// Outbound video sender (retained for track replacement)
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
}

impl PeerLink {
    /// Create a link in `New` and attach the current local tracks
    ///
    /// # Arguments
    ///
    /// * `participant_id` - Remote participant this link belongs to
    /// * `config` - STUN/TURN configuration
    /// * `media` - Shared local media set to seed the outbound senders
    /// * `events` - Channel the link reports on (local candidates,
    ///   remote tracks, transport state)
    #[instrument(skip(config, media, events), fields(participant_id = %participant_id))]
    pub(crate) async fn new(
        participant_id: String,
        config: &SessionConfig,
        media: &LocalMediaSet,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let link_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer link: participant_id={}, link_id={}",
            participant_id, link_id
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );

        let state = Arc::new(RwLock::new(LinkState::New));

        // Locally discovered candidates go straight out, tagged with
        // the destination participant.
        let events_clone = events.clone();
        let candidate_target = participant_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events_clone.send(PeerEvent::SignalOut {
                            to: candidate_target.clone(),
                            payload: SignalPayload::Candidate(IceCandidate::from(init)),
                        });
                    }
                    Err(e) => {
                        warn!(
                            "Failed to serialize local candidate for {}: {}",
                            candidate_target, e
                        );
                    }
                }
            } else {
                debug!("Candidate gathering complete for {}", candidate_target);
            }
            Box::pin(async {})
        }));

        // Bridge transport state onto the link state machine.
        let state_clone = Arc::clone(&state);
        let events_clone = events.clone();
        let state_target = participant_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_clone = Arc::clone(&state_clone);
            let events_clone = events_clone.clone();
            let participant_id = state_target.clone();

            Box::pin(async move {
                let new_state = match s {
                    RTCPeerConnectionState::Connected => LinkState::Connected,
                    RTCPeerConnectionState::Failed => {
                        let _ = events_clone.send(PeerEvent::ConnectionFailed {
                            participant_id: participant_id.clone(),
                        });
                        LinkState::Closed
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        LinkState::Closed
                    }
                    _ => return,
                };

                if transition(&state_clone, &participant_id, new_state).await {
                    let _ = events_clone.send(PeerEvent::StateChanged {
                        participant_id,
                        state: new_state,
                    });
                }
            })
        }));

        // Remote media surfaces as an event; the rendering layer
        // subscribes, it is never called from in here.
        let events_clone = events.clone();
        let track_target = participant_id.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let _ = events_clone.send(PeerEvent::RemoteTrack {
                    participant_id: track_target.clone(),
                    track,
                });
                Box::pin(async {})
            },
        ));

        let link = Self {
            participant_id,
            link_id,
            state,
            pc,
            pending_candidates: Mutex::new(Vec::new()),
            negotiation: Mutex::new(()),
            audio_sender: RwLock::new(None),
            video_sender: RwLock::new(None),
        };

        link.attach_local_tracks(media).await?;

        Ok(link)
    }

    /// Seed outbound senders from the shared local media set
    ///
    /// Senders are created from the raw handles so later enable/disable
    /// can swap the payload without renegotiation; a currently disabled
    /// track starts out replaced with nothing.
    async fn attach_local_tracks(&self, media: &LocalMediaSet) -> Result<()> {
        if let Some(seed) = media.audio_seed() {
            let sender = self
                .pc
                .add_track(Arc::clone(&seed) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaTrack(format!("Failed to add audio track: {}", e)))?;

            if media.current_audio_track().is_none() {
                sender
                    .replace_track(None)
                    .await
                    .map_err(|e| Error::MediaTrack(format!("Failed to mute audio: {}", e)))?;
            }

            *self.audio_sender.write().await = Some(sender);
        }

        if let Some(seed) = media.video_seed() {
            let sender = self
                .pc
                .add_track(Arc::clone(&seed) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaTrack(format!("Failed to add video track: {}", e)))?;

            if media.current_video_track().is_none() {
                sender
                    .replace_track(None)
                    .await
                    .map_err(|e| Error::MediaTrack(format!("Failed to blank video: {}", e)))?;
            }

            *self.video_sender.write().await = Some(sender);
        }

        Ok(())
    }

    /// Get the remote participant ID
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Get this link instance's ID
    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    /// Get the current negotiation state
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Whether the link has been torn down
    pub async fn is_closed(&self) -> bool {
        self.state().await == LinkState::Closed
    }

    /// Number of remote candidates still waiting for the remote
    /// description
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    /// Serialize a negotiation step for this link
    pub(crate) async fn lock_negotiation(&self) -> MutexGuard<'_, ()> {
        self.negotiation.lock().await
    }

    /// Create the first offer and move to `OfferSent`
    ///
    /// Returns `None` when the link was closed underneath the call
    /// (stale-result discard).
    pub(crate) async fn initiate_offer(&self) -> Result<Option<String>> {
        if self.is_closed().await {
            return Ok(None);
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description after setting offer".to_string()))?;

        if self.is_closed().await {
            debug!("Discarding stale offer for closed link {}", self.participant_id);
            return Ok(None);
        }

        transition(&self.state, &self.participant_id, LinkState::OfferSent).await;

        debug!("Created offer for {}", self.participant_id);

        Ok(Some(local_desc.sdp))
    }

    /// Apply a remote offer, flush queued candidates and answer it
    ///
    /// Returns the answer SDP, or `None` when the link was closed
    /// underneath the call.
    pub(crate) async fn accept_offer(&self, offer_sdp: String) -> Result<Option<String>> {
        if self.is_closed().await {
            return Ok(None);
        }

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::Sdp(format!("Failed to parse offer: {}", e)))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;

        transition(&self.state, &self.participant_id, LinkState::OfferReceived).await;

        // The description is in place: queued candidates apply now, in
        // arrival order, before anything else happens on this link.
        self.flush_pending_candidates().await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description after setting answer".to_string()))?;

        if self.is_closed().await {
            debug!(
                "Discarding stale answer for closed link {}",
                self.participant_id
            );
            return Ok(None);
        }

        transition(&self.state, &self.participant_id, LinkState::AnswerExchanged).await;

        debug!("Created answer for {}", self.participant_id);

        Ok(Some(local_desc.sdp))
    }

    /// Apply a remote answer and flush queued candidates
    pub(crate) async fn accept_answer(&self, answer_sdp: String) -> Result<()> {
        if self.is_closed().await {
            return Ok(());
        }

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::Sdp(format!("Failed to parse answer: {}", e)))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;

        transition(&self.state, &self.participant_id, LinkState::AnswerExchanged).await;

        self.flush_pending_candidates().await;

        Ok(())
    }

    /// Apply a remote candidate, or queue it while no remote
    /// description exists yet
    pub(crate) async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.is_closed().await {
            debug!(
                "Discarding candidate for closed link {}",
                self.participant_id
            );
            return Ok(());
        }

        if self.pc.remote_description().await.is_none() {
            debug!(
                "Queueing candidate for {} until the remote description is set",
                self.participant_id
            );
            self.pending_candidates.lock().await.push(candidate);
            return Ok(());
        }

        self.pc
            .add_ice_candidate(RTCIceCandidateInit::from(candidate))
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add candidate: {}", e)))
    }

    /// Apply every queued candidate in arrival order
    async fn flush_pending_candidates(&self) {
        let candidates: Vec<IceCandidate> = {
            let mut pending = self.pending_candidates.lock().await;
            pending.drain(..).collect()
        };

        for candidate in candidates {
            if let Err(e) = self
                .pc
                .add_ice_candidate(RTCIceCandidateInit::from(candidate))
                .await
            {
                warn!(
                    "Failed to apply queued candidate for {}: {}",
                    self.participant_id, e
                );
            }
        }
    }

    /// Whether a remote description has been applied
    pub async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    /// Swap the outbound audio payload without renegotiation
    ///
    /// Never touches the link state.
    pub(crate) async fn replace_audio(
        &self,
        track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<()> {
        let sender = self.audio_sender.read().await.clone();
        match sender {
            Some(sender) => sender
                .replace_track(track.map(|t| t as Arc<dyn TrackLocal + Send + Sync>))
                .await
                .map_err(|e| Error::MediaTrack(format!("Failed to replace audio: {}", e))),
            None => {
                debug!("No audio sender on link {}, skipping swap", self.participant_id);
                Ok(())
            }
        }
    }

    /// Swap the outbound video payload without renegotiation
    ///
    /// Never touches the link state.
    pub(crate) async fn replace_video(
        &self,
        track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<()> {
        let sender = self.video_sender.read().await.clone();
        match sender {
            Some(sender) => sender
                .replace_track(track.map(|t| t as Arc<dyn TrackLocal + Send + Sync>))
                .await
                .map_err(|e| Error::MediaTrack(format!("Failed to replace video: {}", e))),
            None => {
                debug!("No video sender on link {}, skipping swap", self.participant_id);
                Ok(())
            }
        }
    }

    /// Tear the link down
    ///
    /// The state flips to `Closed` first so any in-flight negotiation
    /// step lands as a no-op; queued candidates are discarded.
    pub(crate) async fn close(&self) -> Result<()> {
        info!("Closing peer link for {}", self.participant_id);

        *self.state.write().await = LinkState::Closed;
        self.pending_candidates.lock().await.clear();

        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close connection: {}", e)))
    }
}

/// Apply a state transition, refusing to leave `Closed`
///
/// Returns whether the state actually changed; a transition attempted
/// after the link closed is the stale-result discard path.
async fn transition(
    state: &Arc<RwLock<LinkState>>,
    participant_id: &str,
    new_state: LinkState,
) -> bool {
    let mut guard = state.write().await;
    let old_state = *guard;

    if old_state == new_state {
        return false;
    }

    if old_state == LinkState::Closed {
        debug!(
            "Discarding stale transition {:?} for closed link {}",
            new_state, participant_id
        );
        return false;
    }

    debug!(
        "Link {} state transition: {:?} -> {:?}",
        participant_id, old_state, new_state
    );
    *guard = new_state;

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{opus_capture_track, vp8_capture_track};

    fn test_config() -> SessionConfig {
        SessionConfig {
            session_id: "meeting-test".to_string(),
            is_initiator: true,
            ..Default::default()
        }
    }

    fn test_media() -> LocalMediaSet {
        LocalMediaSet::new(
            Some(opus_capture_track("audio-local", "stream-local")),
            Some(vp8_capture_track("video-local", "stream-local")),
        )
    }

    async fn test_link() -> (PeerLink, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = PeerLink::new("peer-remote".to_string(), &test_config(), &test_media(), tx)
            .await
            .unwrap();
        (link, rx)
    }

    #[tokio::test]
    async fn test_new_link_starts_in_new() {
        let (link, _rx) = test_link().await;
        assert_eq!(link.state().await, LinkState::New);
        assert_eq!(link.participant_id(), "peer-remote");
        assert_eq!(link.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_initiate_offer_moves_to_offer_sent() {
        let (link, _rx) = test_link().await;

        let sdp = link.initiate_offer().await.unwrap();
        assert!(sdp.is_some());
        assert!(!sdp.unwrap().is_empty());
        assert_eq!(link.state().await, LinkState::OfferSent);
    }

    #[tokio::test]
    async fn test_accept_offer_produces_answer() {
        let (offerer, _rx_a) = test_link().await;
        let (answerer, _rx_b) = test_link().await;

        let offer = offerer.initiate_offer().await.unwrap().unwrap();
        let answer = answerer.accept_offer(offer).await.unwrap();
        assert!(answer.is_some());
        assert_eq!(answerer.state().await, LinkState::AnswerExchanged);
        assert!(answerer.has_remote_description().await);

        offerer.accept_answer(answer.unwrap()).await.unwrap();
        assert_eq!(offerer.state().await, LinkState::AnswerExchanged);
    }

    #[tokio::test]
    async fn test_candidates_queue_until_remote_description() {
        let (offerer, _rx_a) = test_link().await;
        let (answerer, _rx_b) = test_link().await;

        let early = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        answerer.add_remote_candidate(early.clone()).await.unwrap();
        answerer.add_remote_candidate(early).await.unwrap();
        assert_eq!(answerer.pending_candidate_count().await, 2);

        let offer = offerer.initiate_offer().await.unwrap().unwrap();
        answerer.accept_offer(offer).await.unwrap();

        // Applied in arrival order as soon as the description landed.
        assert_eq!(answerer.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_link_discards_negotiation() {
        let (link, _rx) = test_link().await;

        link.close().await.unwrap();
        assert_eq!(link.state().await, LinkState::Closed);

        // Every step is a stale no-op now.
        assert!(link.initiate_offer().await.unwrap().is_none());
        assert!(link
            .accept_offer("v=0".to_string())
            .await
            .unwrap()
            .is_none());
        assert_eq!(link.state().await, LinkState::Closed);

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        link.add_remote_candidate(candidate).await.unwrap();
        assert_eq!(link.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_discards_queued_candidates() {
        let (link, _rx) = test_link().await;

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        link.add_remote_candidate(candidate).await.unwrap();
        assert_eq!(link.pending_candidate_count().await, 1);

        link.close().await.unwrap();
        assert_eq!(link.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_track_replacement_keeps_state() {
        let (link, _rx) = test_link().await;

        link.initiate_offer().await.unwrap();
        let before = link.state().await;

        link.replace_video(None).await.unwrap();
        link.replace_video(Some(vp8_capture_track("video-alt", "stream-local")))
            .await
            .unwrap();
        link.replace_audio(None).await.unwrap();

        assert_eq!(link.state().await, before);
    }
}
