//! Peer link management
//!
//! Owns one [`PeerLink`] per remote participant, drives the
//! offer/answer/candidate exchange per link and keeps every link's
//! outbound media in sync with local intent.

use super::link::{LinkState, PeerLink};
use super::PeerEvent;
use crate::config::SessionConfig;
use crate::media::LocalMediaSet;
use crate::signaling::{IceCandidate, SignalPayload};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Manages the mesh of peer links
///
/// Exactly one link exists per remote participant at any time;
/// duplicate creation attempts are no-ops, and signals from unknown
/// participants lazily create their link (a signal racing ahead of the
/// join notification is recovered locally, not an error).
pub struct PeerLinkManager {
    /// Session configuration (initiator flag, ICE servers, timeouts)
    config: Arc<SessionConfig>,

    /// Shared local media, the single mutation path for every link's
    /// outbound tracks
    media: Arc<LocalMediaSet>,

    /// Map of participant_id to PeerLink
    links: RwLock<HashMap<String, Arc<PeerLink>>>,

    /// Channel the links and the manager report on
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerLinkManager {
    /// Create a new manager
    pub fn new(
        config: Arc<SessionConfig>,
        media: Arc<LocalMediaSet>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            config,
            media,
            links: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Handle a join notification for a remote participant
    ///
    /// Creates the link when absent (no-op otherwise). When the local
    /// session is the designated initiator for newcomers, the first
    /// offer goes out immediately; otherwise the link stays passive and
    /// waits for the incoming offer.
    pub async fn on_participant_joined(&self, participant_id: &str) -> Result<()> {
        let (link, created) = self.ensure_link(participant_id).await?;
        if !created {
            debug!("Link for {} already exists, ignoring join", participant_id);
            return Ok(());
        }

        if !self.config.is_initiator {
            debug!("Awaiting offer from {}", participant_id);
            return Ok(());
        }

        let _guard = link.lock_negotiation().await;
        if let Some(sdp) = link.initiate_offer().await? {
            self.send_signal(participant_id, SignalPayload::Offer(sdp));
        }

        Ok(())
    }

    /// Handle one signaling payload from a remote participant
    ///
    /// The link is created lazily when the signal arrives before the
    /// join notification.
    pub async fn on_signal(&self, from: &str, payload: SignalPayload) -> Result<()> {
        let (link, created) = self.ensure_link(from).await?;
        if created {
            info!("Link for {} created by early signal", from);
        }

        let _guard = link.lock_negotiation().await;
        match payload {
            SignalPayload::Offer(sdp) => {
                if let Some(answer) = link.accept_offer(sdp).await? {
                    self.send_signal(from, SignalPayload::Answer(answer));
                }
            }
            SignalPayload::Answer(sdp) => {
                link.accept_answer(sdp).await?;
            }
            SignalPayload::Candidate(candidate) => {
                link.add_remote_candidate(candidate).await?;
            }
        }

        Ok(())
    }

    /// Handle a departure notification
    ///
    /// Closes and discards the link together with its queued
    /// candidates; idempotent when no link exists.
    pub async fn on_participant_left(&self, participant_id: &str) -> Result<()> {
        let link = self.links.write().await.remove(participant_id);

        match link {
            Some(link) => {
                info!("Removing link for departed participant {}", participant_id);
                if let Err(e) = link.close().await {
                    warn!("Error closing link for {}: {}", participant_id, e);
                }
            }
            None => {
                debug!("No link for departed participant {}", participant_id);
            }
        }

        Ok(())
    }

    /// Toggle outbound camera video on every link
    ///
    /// Pure track replacement; no link's negotiation state changes.
    pub async fn set_local_video_enabled(&self, enabled: bool) -> Result<()> {
        self.media.set_video_enabled(enabled);
        self.fan_out_video().await
    }

    /// Toggle outbound microphone audio on every link
    pub async fn set_local_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.media.set_audio_enabled(enabled);
        let track = self.media.current_audio_track();

        for link in self.live_links().await {
            if let Err(e) = link.replace_audio(track.clone()).await {
                warn!("Audio swap failed for {}: {}", link.participant_id(), e);
            }
        }

        Ok(())
    }

    /// Substitute the camera track on every link (`None` blanks it)
    pub async fn replace_outbound_video(
        &self,
        track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<()> {
        self.media.set_camera(track);
        self.fan_out_video().await
    }

    /// Share a screen-capture track across all links
    ///
    /// The camera handle is retained and restored by
    /// [`stop_screen_share`](Self::stop_screen_share) or by the capture
    /// layer reporting the track's end.
    pub async fn share_screen(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        self.media.start_screen(track);
        self.fan_out_video().await
    }

    /// End the screen share and restore the camera (if still enabled)
    ///
    /// Also invoked when the screen track ends on its own, without an
    /// explicit stop.
    pub async fn stop_screen_share(&self) -> Result<()> {
        if !self.media.is_screen_sharing() {
            debug!("No screen share active");
            return Ok(());
        }

        self.media.stop_screen();
        self.fan_out_video().await
    }

    /// Push the currently intended video track to every link
    pub async fn fan_out_video(&self) -> Result<()> {
        let track = self.media.current_video_track();

        for link in self.live_links().await {
            if let Err(e) = link.replace_video(track.clone()).await {
                warn!("Video swap failed for {}: {}", link.participant_id(), e);
            }
        }

        Ok(())
    }

    /// The shared local media set
    pub fn media(&self) -> &LocalMediaSet {
        &self.media
    }

    /// Get a link by participant ID
    pub async fn link(&self, participant_id: &str) -> Result<Arc<PeerLink>> {
        self.links
            .read()
            .await
            .get(participant_id)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(participant_id.to_string()))
    }

    /// Negotiation state of one link, if it exists
    pub async fn link_state(&self, participant_id: &str) -> Option<LinkState> {
        let link = self.links.read().await.get(participant_id).cloned()?;
        Some(link.state().await)
    }

    /// Whether a link exists for the participant
    pub async fn has_link(&self, participant_id: &str) -> bool {
        self.links.read().await.contains_key(participant_id)
    }

    /// Participant IDs with a live link
    pub async fn live_participants(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }

    /// Snapshot of every live link
    async fn live_links(&self) -> Vec<Arc<PeerLink>> {
        self.links.read().await.values().cloned().collect()
    }

    /// Number of live links
    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Close every link (session shutdown)
    pub async fn close_all(&self) {
        debug!("Closing all peer links");

        let links: Vec<(String, Arc<PeerLink>)> = self.links.write().await.drain().collect();

        for (participant_id, link) in links {
            if let Err(e) = link.close().await {
                warn!("Error closing link for {}: {}", participant_id, e);
            }
        }
    }

    /// Create the link for a participant unless it already exists
    ///
    /// Returns the link and whether this call created it.
    async fn ensure_link(&self, participant_id: &str) -> Result<(Arc<PeerLink>, bool)> {
        if let Some(link) = self.links.read().await.get(participant_id) {
            return Ok((Arc::clone(link), false));
        }

        let link = Arc::new(
            PeerLink::new(
                participant_id.to_string(),
                &self.config,
                &self.media,
                self.events.clone(),
            )
            .await?,
        );

        {
            let mut links = self.links.write().await;
            // A concurrent creation may have won the race; the earlier
            // link stays, ours is dropped (duplicate creation is a
            // no-op).
            if let Some(existing) = links.get(participant_id) {
                let existing = Arc::clone(existing);
                drop(links);
                let _ = link.close().await;
                return Ok((existing, false));
            }
            links.insert(participant_id.to_string(), Arc::clone(&link));
        }

        self.spawn_negotiation_watchdog(Arc::clone(&link));

        Ok((link, true))
    }

    /// Report (once) when a link never sees a remote description
    ///
    /// No automatic retry: the failure is surfaced per peer and leaves
    /// every other link untouched.
    fn spawn_negotiation_watchdog(&self, link: Arc<PeerLink>) {
        let timeout = Duration::from_millis(self.config.negotiation_timeout_ms);
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            if link.is_closed().await {
                return;
            }

            if matches!(link.state().await, LinkState::New | LinkState::OfferSent) {
                warn!(
                    "No remote description from {} within {:?}",
                    link.participant_id(),
                    timeout
                );
                let _ = events.send(PeerEvent::NegotiationTimedOut {
                    participant_id: link.participant_id().to_string(),
                });
            }
        });
    }

    /// Send one outbound signal through the event channel
    fn send_signal(&self, to: &str, payload: SignalPayload) {
        let _ = self.events.send(PeerEvent::SignalOut {
            to: to.to_string(),
            payload,
        });
    }

    /// Apply one remote candidate directly (test/diagnostic path)
    #[allow(dead_code)]
    pub(crate) async fn add_candidate(&self, participant_id: &str, candidate: IceCandidate) -> Result<()> {
        let link = self.link(participant_id).await?;
        link.add_remote_candidate(candidate).await
    }

    /// Snapshot of each live link's state (diagnostics)
    pub async fn link_states(&self) -> Vec<(String, LinkState)> {
        let links: Vec<(String, Arc<PeerLink>)> = self
            .links
            .read()
            .await
            .iter()
            .map(|(id, link)| (id.clone(), Arc::clone(link)))
            .collect();

        let mut states = Vec::with_capacity(links.len());
        for (id, link) in links {
            states.push((id, link.state().await));
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{opus_capture_track, vp8_capture_track};

    fn manager_with(is_initiator: bool) -> (PeerLinkManager, mpsc::UnboundedReceiver<PeerEvent>) {
        let config = Arc::new(SessionConfig {
            session_id: "meeting-test".to_string(),
            is_initiator,
            ..Default::default()
        });
        let media = Arc::new(LocalMediaSet::new(
            Some(opus_capture_track("audio-local", "stream-local")),
            Some(vp8_capture_track("video-local", "stream-local")),
        ));
        let (tx, rx) = mpsc::unbounded_channel();

        (PeerLinkManager::new(config, media, tx), rx)
    }

    /// Drain currently queued events without waiting
    fn drain(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_creates_single_link() {
        let (manager, _rx) = manager_with(false);

        manager.on_participant_joined("peer-a").await.unwrap();
        assert_eq!(manager.link_count().await, 1);
        assert_eq!(manager.link_state("peer-a").await, Some(LinkState::New));

        // Duplicate join is a no-op.
        manager.on_participant_joined("peer-a").await.unwrap();
        assert_eq!(manager.link_count().await, 1);
    }

    #[tokio::test]
    async fn test_initiator_join_reaches_offer_sent() {
        let (manager, mut rx) = manager_with(true);

        manager.on_participant_joined("peer-a").await.unwrap();
        assert_eq!(
            manager.link_state("peer-a").await,
            Some(LinkState::OfferSent)
        );

        // The offer went out without any inbound signal.
        let sent_offer = drain(&mut rx).into_iter().any(|event| {
            matches!(
                event,
                PeerEvent::SignalOut {
                    ref to,
                    payload: SignalPayload::Offer(_),
                } if to == "peer-a"
            )
        });
        assert!(sent_offer);
    }

    #[tokio::test]
    async fn test_passive_join_stays_new() {
        let (manager, mut rx) = manager_with(false);

        manager.on_participant_joined("peer-a").await.unwrap();
        assert_eq!(manager.link_state("peer-a").await, Some(LinkState::New));

        let sent_offer = drain(&mut rx).into_iter().any(|event| {
            matches!(
                event,
                PeerEvent::SignalOut {
                    payload: SignalPayload::Offer(_),
                    ..
                }
            )
        });
        assert!(!sent_offer);
    }

    #[tokio::test]
    async fn test_signal_before_join_creates_link() {
        let (manager, _rx) = manager_with(false);

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        manager
            .on_signal("peer-early", SignalPayload::Candidate(candidate))
            .await
            .unwrap();

        assert!(manager.has_link("peer-early").await);
        let link = manager.link("peer-early").await.unwrap();
        assert_eq!(link.pending_candidate_count().await, 1);

        // The subsequent join notification does not clobber the link.
        manager.on_participant_joined("peer-early").await.unwrap();
        assert_eq!(manager.link_count().await, 1);
        assert_eq!(link.pending_candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_offer_signal_yields_answer() {
        let (initiator, mut initiator_rx) = manager_with(true);
        let (responder, mut responder_rx) = manager_with(false);

        initiator.on_participant_joined("peer-b").await.unwrap();
        let offer = drain(&mut initiator_rx)
            .into_iter()
            .find_map(|event| match event {
                PeerEvent::SignalOut {
                    payload: SignalPayload::Offer(sdp),
                    ..
                } => Some(sdp),
                _ => None,
            })
            .expect("initiator must produce an offer");

        responder
            .on_signal("peer-a", SignalPayload::Offer(offer))
            .await
            .unwrap();
        assert_eq!(
            responder.link_state("peer-a").await,
            Some(LinkState::AnswerExchanged)
        );

        let answer = drain(&mut responder_rx)
            .into_iter()
            .find_map(|event| match event {
                PeerEvent::SignalOut {
                    payload: SignalPayload::Answer(sdp),
                    ..
                } => Some(sdp),
                _ => None,
            })
            .expect("responder must produce an answer");

        initiator
            .on_signal("peer-b", SignalPayload::Answer(answer))
            .await
            .unwrap();
        assert_eq!(
            initiator.link_state("peer-b").await,
            Some(LinkState::AnswerExchanged)
        );
    }

    #[tokio::test]
    async fn test_leave_removes_link_idempotently() {
        let (manager, _rx) = manager_with(false);

        manager.on_participant_joined("peer-a").await.unwrap();
        manager.on_participant_joined("peer-b").await.unwrap();
        assert_eq!(manager.link_count().await, 2);

        manager.on_participant_left("peer-a").await.unwrap();
        assert!(!manager.has_link("peer-a").await);
        assert_eq!(manager.link_count().await, 1);

        // Absent participant: still Ok.
        manager.on_participant_left("peer-a").await.unwrap();
        manager.on_participant_left("peer-unknown").await.unwrap();
        assert_eq!(manager.link_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_leave_sequences_track_membership() {
        let (manager, _rx) = manager_with(false);

        for id in ["peer-a", "peer-b", "peer-c"] {
            manager.on_participant_joined(id).await.unwrap();
        }
        manager.on_participant_left("peer-b").await.unwrap();
        manager.on_participant_joined("peer-d").await.unwrap();
        manager.on_participant_left("peer-a").await.unwrap();

        let mut live = manager.live_participants().await;
        live.sort();
        assert_eq!(live, vec!["peer-c", "peer-d"]);
    }

    #[tokio::test]
    async fn test_media_fan_out_keeps_states() {
        let (manager, _rx) = manager_with(true);

        manager.on_participant_joined("peer-a").await.unwrap();
        manager.on_participant_joined("peer-b").await.unwrap();
        let before = manager.link_states().await;

        manager.set_local_video_enabled(false).await.unwrap();
        manager.set_local_audio_enabled(false).await.unwrap();
        manager
            .share_screen(vp8_capture_track("screen-local", "stream-local"))
            .await
            .unwrap();
        manager.stop_screen_share().await.unwrap();
        manager.set_local_video_enabled(true).await.unwrap();

        let mut after = manager.link_states().await;
        let mut expected = before;
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        after.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (manager, _rx) = manager_with(false);

        manager.on_participant_joined("peer-a").await.unwrap();
        manager.on_participant_joined("peer-b").await.unwrap();

        manager.close_all().await;
        assert_eq!(manager.link_count().await, 0);
    }
}
