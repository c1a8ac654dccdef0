//! Session coordination
//!
//! [`SessionCoordinator`] is the thin composition point: a single event
//! loop that wires relay events to the [`PeerLinkManager`] and
//! classifier outputs to the application. All asynchronous completions
//! (relay frames, peer callbacks, media samples, capture-layer signals
//! like a screen track ending) enter the loop as discrete messages, so
//! per-peer ordering is preserved and nothing re-enters negotiation
//! logic synchronously.

use crate::analyze::{ActiveSpeakerDetector, GazeClassifier, GazeDirection, LandmarkFrame};
use crate::config::SessionConfig;
use crate::media::{LocalMediaSet, MediaKind};
use crate::peer::{LinkState, PeerEvent, PeerLinkManager};
use crate::signaling::{signal_payload, RelayMessage, SignalingRelay};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// A session member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Relay-assigned identifier
    pub participant_id: String,

    /// Display label
    pub label: String,
}

/// Application command into the session loop
pub enum SessionCommand {
    /// Toggle outbound camera video
    SetVideoEnabled(bool),

    /// Toggle outbound microphone audio
    SetAudioEnabled(bool),

    /// Substitute the camera track (`None` blanks it)
    ReplaceCameraTrack(Option<Arc<TrackLocalStaticSample>>),

    /// Start sharing a screen-capture track
    ShareScreen(Arc<TrackLocalStaticSample>),

    /// Explicitly end the screen share
    StopScreenShare,

    /// The screen track ended on its own (capture-layer signal)
    ScreenShareEnded,

    /// One audio energy sample for a participant
    AudioLevel {
        /// Sampled participant (the local one included)
        participant_id: String,
        /// Instantaneous energy
        energy: f32,
    },

    /// One facial landmark observation (`None` = no face detected)
    GazeSample(Option<LandmarkFrame>),

    /// Send a chat message to the session
    SendChat(String),

    /// Raise the local hand
    RaiseHand,

    /// The capture layer failed to acquire a media type
    MediaFailed {
        /// Affected media type
        kind: MediaKind,
        /// Human-readable cause
        reason: String,
    },

    /// Tear the session down
    Shutdown,
}

/// Event the rendering layer subscribes to
#[derive(Clone)]
pub enum SessionEvent {
    /// A remote participant entered the session
    ParticipantJoined {
        /// The new member
        participant: Participant,
    },

    /// A remote participant left the session
    ParticipantLeft {
        /// Departed participant
        participant_id: String,
    },

    /// A remote media track arrived
    RemoteTrackAdded {
        /// Originating participant
        participant_id: String,
        /// The received track
        track: Arc<TrackRemote>,
    },

    /// A peer link was torn down
    PeerClosed {
        /// Affected participant
        participant_id: String,
    },

    /// A peer link's negotiation state changed
    LinkStateChanged {
        /// Affected participant
        participant_id: String,
        /// New state
        state: LinkState,
    },

    /// Negotiation with one peer did not complete in time
    NegotiationFailed {
        /// Affected participant
        participant_id: String,
    },

    /// An established transport failed
    ConnectionFailed {
        /// Affected participant
        participant_id: String,
    },

    /// The local gaze direction changed (confirmed and emitted)
    GazeDirectionChanged {
        /// Newly confirmed direction
        direction: GazeDirection,
        /// Session clock timestamp (ms)
        timestamp_ms: u64,
    },

    /// A remote participant's gaze direction changed
    GazeUpdate {
        /// Originating participant
        participant_id: String,
        /// Their confirmed direction
        direction: GazeDirection,
    },

    /// The loudest participant changed
    ActiveSpeakerChanged {
        /// Current speaker, `None` when nobody is tracked
        participant_id: Option<String>,
    },

    /// A chat message arrived
    ChatReceived {
        /// Message body
        message: String,
    },

    /// A participant raised their hand
    HandRaised {
        /// Raising participant
        participant_id: String,
    },

    /// A local media type is unavailable; the session continues
    /// without it
    LocalMediaUnavailable {
        /// Affected media type
        kind: MediaKind,
    },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::ParticipantJoined { participant } => f
                .debug_struct("ParticipantJoined")
                .field("participant", participant)
                .finish(),
            SessionEvent::ParticipantLeft { participant_id } => f
                .debug_struct("ParticipantLeft")
                .field("participant_id", participant_id)
                .finish(),
            // The remote track itself has no useful debug form.
            SessionEvent::RemoteTrackAdded { participant_id, .. } => f
                .debug_struct("RemoteTrackAdded")
                .field("participant_id", participant_id)
                .finish_non_exhaustive(),
            SessionEvent::PeerClosed { participant_id } => f
                .debug_struct("PeerClosed")
                .field("participant_id", participant_id)
                .finish(),
            SessionEvent::LinkStateChanged {
                participant_id,
                state,
            } => f
                .debug_struct("LinkStateChanged")
                .field("participant_id", participant_id)
                .field("state", state)
                .finish(),
            SessionEvent::NegotiationFailed { participant_id } => f
                .debug_struct("NegotiationFailed")
                .field("participant_id", participant_id)
                .finish(),
            SessionEvent::ConnectionFailed { participant_id } => f
                .debug_struct("ConnectionFailed")
                .field("participant_id", participant_id)
                .finish(),
            SessionEvent::GazeDirectionChanged {
                direction,
                timestamp_ms,
            } => f
                .debug_struct("GazeDirectionChanged")
                .field("direction", direction)
                .field("timestamp_ms", timestamp_ms)
                .finish(),
            SessionEvent::GazeUpdate {
                participant_id,
                direction,
            } => f
                .debug_struct("GazeUpdate")
                .field("participant_id", participant_id)
                .field("direction", direction)
                .finish(),
            SessionEvent::ActiveSpeakerChanged { participant_id } => f
                .debug_struct("ActiveSpeakerChanged")
                .field("participant_id", participant_id)
                .finish(),
            SessionEvent::ChatReceived { message } => f
                .debug_struct("ChatReceived")
                .field("message", message)
                .finish(),
            SessionEvent::HandRaised { participant_id } => f
                .debug_struct("HandRaised")
                .field("participant_id", participant_id)
                .finish(),
            SessionEvent::LocalMediaUnavailable { kind } => f
                .debug_struct("LocalMediaUnavailable")
                .field("kind", kind)
                .finish(),
        }
    }
}

/// Handle for driving a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Send one command into the session loop
    pub fn command(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::Signaling("Session event loop has stopped".to_string()))
    }

    /// Toggle outbound camera video
    pub fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.command(SessionCommand::SetVideoEnabled(enabled))
    }

    /// Toggle outbound microphone audio
    pub fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.command(SessionCommand::SetAudioEnabled(enabled))
    }

    /// Substitute the camera track across all links
    pub fn replace_camera_track(&self, track: Option<Arc<TrackLocalStaticSample>>) -> Result<()> {
        self.command(SessionCommand::ReplaceCameraTrack(track))
    }

    /// Start sharing a screen-capture track
    pub fn share_screen(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        self.command(SessionCommand::ShareScreen(track))
    }

    /// End the screen share
    pub fn stop_screen_share(&self) -> Result<()> {
        self.command(SessionCommand::StopScreenShare)
    }

    /// Report that the screen track ended on its own
    pub fn screen_share_ended(&self) -> Result<()> {
        self.command(SessionCommand::ScreenShareEnded)
    }

    /// Feed one audio energy sample
    pub fn sample_audio_level(&self, participant_id: &str, energy: f32) -> Result<()> {
        self.command(SessionCommand::AudioLevel {
            participant_id: participant_id.to_string(),
            energy,
        })
    }

    /// Feed one facial landmark observation
    pub fn sample_gaze(&self, frame: Option<LandmarkFrame>) -> Result<()> {
        self.command(SessionCommand::GazeSample(frame))
    }

    /// Send a chat message
    pub fn send_chat(&self, message: &str) -> Result<()> {
        self.command(SessionCommand::SendChat(message.to_string()))
    }

    /// Raise the local hand
    pub fn raise_hand(&self) -> Result<()> {
        self.command(SessionCommand::RaiseHand)
    }

    /// Report a media acquisition failure
    pub fn report_media_failure(&self, kind: MediaKind, reason: &str) -> Result<()> {
        self.command(SessionCommand::MediaFailed {
            kind,
            reason: reason.to_string(),
        })
    }

    /// Tear the session down
    pub fn shutdown(&self) -> Result<()> {
        self.command(SessionCommand::Shutdown)
    }
}

/// The session event loop
pub struct SessionCoordinator {
    config: Arc<SessionConfig>,

    /// Relay-assigned local participant identifier
    local_id: String,

    relay: Arc<dyn SignalingRelay>,

    manager: PeerLinkManager,

    /// Members by identifier, the local one included
    participants: HashMap<String, Participant>,

    speaker: ActiveSpeakerDetector,

    gaze: GazeClassifier,

    /// Last reported speaker (event-on-change)
    last_speaker: Option<String>,

    /// Session clock epoch for classifier timestamps
    epoch: Instant,

    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionCoordinator {
    /// Wire up a session
    ///
    /// # Arguments
    ///
    /// * `config` - Validated on entry
    /// * `local_id` - The relay-assigned local participant identifier
    /// * `relay` - Outbound half of the relay channel
    /// * `relay_rx` - Inbound relay events
    /// * `media` - Local track handles from the capture layer
    ///
    /// Returns the coordinator (to be `run`), the command handle and
    /// the event stream for the rendering layer.
    pub fn new(
        config: SessionConfig,
        local_id: String,
        relay: Arc<dyn SignalingRelay>,
        relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
        media: LocalMediaSet,
    ) -> Result<(
        Self,
        SessionHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
    )> {
        config.validate()?;

        let config = Arc::new(config);
        let media = Arc::new(media);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let manager = PeerLinkManager::new(Arc::clone(&config), Arc::clone(&media), peer_tx);
        let gaze = GazeClassifier::new(config.gaze.clone());

        let coordinator = Self {
            config,
            local_id,
            relay,
            manager,
            participants: HashMap::new(),
            speaker: ActiveSpeakerDetector::new(),
            gaze,
            last_speaker: None,
            epoch: Instant::now(),
            relay_rx,
            peer_rx,
            command_rx,
            events_tx,
        };

        let handle = SessionHandle { tx: command_tx };

        Ok((coordinator, handle, events_rx))
    }

    /// Run the event loop until shutdown
    ///
    /// Announces the session membership, then processes relay events,
    /// peer events and application commands on one cooperative loop.
    /// Returns an error only for the fatal case of the relay channel
    /// disappearing.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting session {} as {} (initiator: {})",
            self.config.session_id, self.local_id, self.config.is_initiator
        );

        // Report missing capture up front; the session continues
        // without that media type.
        if self.media_missing(MediaKind::Audio) {
            self.emit(SessionEvent::LocalMediaUnavailable {
                kind: MediaKind::Audio,
            });
        }
        if self.media_missing(MediaKind::Video) {
            self.emit(SessionEvent::LocalMediaUnavailable {
                kind: MediaKind::Video,
            });
        }

        // The local participant exists from the start, and the audio
        // level table always carries the local identifier while
        // sampling is active.
        self.participants.insert(
            self.local_id.clone(),
            Participant {
                participant_id: self.local_id.clone(),
                label: self.config.display_name.clone(),
            },
        );
        self.speaker.sample(&self.local_id, 0.0);
        self.refresh_active_speaker();

        self.relay
            .send(RelayMessage::Join {
                session_id: self.config.session_id.clone(),
            })
            .await?;

        loop {
            tokio::select! {
                relay_event = self.relay_rx.recv() => {
                    match relay_event {
                        Some(message) => self.handle_relay(message).await,
                        None => {
                            error!("Relay channel closed, ending session");
                            self.manager.close_all().await;
                            return Err(Error::Signaling(
                                "Relay channel closed".to_string(),
                            ));
                        }
                    }
                }

                Some(peer_event) = self.peer_rx.recv() => {
                    self.handle_peer(peer_event).await;
                }

                command = self.command_rx.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        // Every handle dropped: treat as shutdown.
                        None => false,
                    };

                    if !keep_running {
                        info!("Session {} shutting down", self.config.session_id);
                        self.manager.close_all().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handle one inbound relay event
    async fn handle_relay(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::ParticipantJoined { participant_id } => {
                if participant_id == self.local_id {
                    debug!("Ignoring join echo for the local participant");
                    return;
                }

                let participant = Participant {
                    participant_id: participant_id.clone(),
                    label: "Peer".to_string(),
                };
                let newly_joined = self
                    .participants
                    .insert(participant_id.clone(), participant.clone())
                    .is_none();
                if newly_joined {
                    self.emit(SessionEvent::ParticipantJoined { participant });
                }

                if let Err(e) = self.manager.on_participant_joined(&participant_id).await {
                    warn!("Link setup for {} failed: {}", participant_id, e);
                    self.emit(SessionEvent::NegotiationFailed { participant_id });
                }
            }

            RelayMessage::Signal {
                from,
                offer,
                answer,
                ice_candidate,
                ..
            } => {
                let from = match from {
                    Some(from) => from,
                    None => {
                        warn!("Dropping signal frame without a sender");
                        return;
                    }
                };

                let payload = match signal_payload(offer, answer, ice_candidate) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping malformed signal from {}: {}", from, e);
                        return;
                    }
                };

                if let Err(e) = self.manager.on_signal(&from, payload).await {
                    warn!("Signal handling for {} failed: {}", from, e);
                    if e.is_peer_error() {
                        self.emit(SessionEvent::NegotiationFailed {
                            participant_id: from,
                        });
                    }
                }
            }

            RelayMessage::ParticipantLeft { participant_id } => {
                let had_link = self.manager.has_link(&participant_id).await;
                if let Err(e) = self.manager.on_participant_left(&participant_id).await {
                    warn!("Teardown for {} failed: {}", participant_id, e);
                }

                if self.participants.remove(&participant_id).is_some() {
                    self.emit(SessionEvent::ParticipantLeft {
                        participant_id: participant_id.clone(),
                    });
                }

                self.speaker.remove(&participant_id);
                self.refresh_active_speaker();

                if had_link {
                    self.emit(SessionEvent::PeerClosed { participant_id });
                }
            }

            RelayMessage::GazeUpdate {
                participant_id,
                direction,
            } => {
                self.emit(SessionEvent::GazeUpdate {
                    participant_id,
                    direction,
                });
            }

            RelayMessage::Chat { message } => {
                self.emit(SessionEvent::ChatReceived { message });
            }

            RelayMessage::RaiseHand { participant_id } => {
                self.emit(SessionEvent::HandRaised { participant_id });
            }

            other => {
                debug!("Ignoring relay event {}", other.event_name());
            }
        }
    }

    /// Handle one event from the peer layer
    async fn handle_peer(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::SignalOut { to, payload } => {
                let message = RelayMessage::signal_to(to, payload);
                if let Err(e) = self.relay.send(message).await {
                    warn!("Failed to forward signal to relay: {}", e);
                }
            }

            PeerEvent::RemoteTrack {
                participant_id,
                track,
            } => {
                self.emit(SessionEvent::RemoteTrackAdded {
                    participant_id,
                    track,
                });
            }

            PeerEvent::StateChanged {
                participant_id,
                state,
            } => {
                self.emit(SessionEvent::LinkStateChanged {
                    participant_id: participant_id.clone(),
                    state,
                });

                if state == LinkState::Closed {
                    self.emit(SessionEvent::PeerClosed { participant_id });
                }
            }

            PeerEvent::NegotiationTimedOut { participant_id } => {
                let err = Error::Negotiation(format!(
                    "{}: no remote description within the bounded wait",
                    participant_id
                ));
                warn!("{}", err);
                self.emit(SessionEvent::NegotiationFailed { participant_id });
            }

            PeerEvent::ConnectionFailed { participant_id } => {
                warn!("Transport failed for {}", participant_id);
                self.emit(SessionEvent::ConnectionFailed { participant_id });
            }
        }
    }

    /// Handle one application command; returns whether to keep running
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SetVideoEnabled(enabled) => {
                if let Err(e) = self.manager.set_local_video_enabled(enabled).await {
                    warn!("Video toggle failed: {}", e);
                }
            }

            SessionCommand::SetAudioEnabled(enabled) => {
                if let Err(e) = self.manager.set_local_audio_enabled(enabled).await {
                    warn!("Audio toggle failed: {}", e);
                }
            }

            SessionCommand::ReplaceCameraTrack(track) => {
                if let Err(e) = self.manager.replace_outbound_video(track).await {
                    warn!("Camera replacement failed: {}", e);
                }
            }

            SessionCommand::ShareScreen(track) => {
                if let Err(e) = self.manager.share_screen(track).await {
                    warn!("Screen share failed: {}", e);
                }
            }

            SessionCommand::StopScreenShare => {
                if let Err(e) = self.manager.stop_screen_share().await {
                    warn!("Screen share stop failed: {}", e);
                }
            }

            SessionCommand::ScreenShareEnded => {
                debug!("Screen track ended, restoring camera");
                if let Err(e) = self.manager.stop_screen_share().await {
                    warn!("Screen share restore failed: {}", e);
                }
            }

            SessionCommand::AudioLevel {
                participant_id,
                energy,
            } => {
                self.speaker.sample(&participant_id, energy);
                self.refresh_active_speaker();
            }

            SessionCommand::GazeSample(frame) => {
                let now_ms = self.epoch.elapsed().as_millis() as u64;
                if let Some(transition) = self.gaze.sample(frame.as_ref(), now_ms) {
                    self.emit(SessionEvent::GazeDirectionChanged {
                        direction: transition.direction,
                        timestamp_ms: transition.timestamp_ms,
                    });

                    let message = RelayMessage::GazeEvent {
                        participant_id: self.local_id.clone(),
                        session_id: self.config.session_id.clone(),
                        direction: transition.direction,
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    };
                    if let Err(e) = self.relay.send(message).await {
                        warn!("Failed to broadcast gaze event: {}", e);
                    }
                }
            }

            SessionCommand::SendChat(message) => {
                if let Err(e) = self.relay.send(RelayMessage::Chat { message }).await {
                    warn!("Failed to send chat message: {}", e);
                }
            }

            SessionCommand::RaiseHand => {
                let message = RelayMessage::RaiseHand {
                    participant_id: self.local_id.clone(),
                };
                if let Err(e) = self.relay.send(message).await {
                    warn!("Failed to send raise-hand: {}", e);
                }
            }

            SessionCommand::MediaFailed { kind, reason } => {
                let err = Error::MediaAcquisition(reason);
                warn!("{} ({:?})", err, kind);
                self.emit(SessionEvent::LocalMediaUnavailable { kind });
            }

            SessionCommand::Shutdown => return false,
        }

        true
    }

    /// Re-evaluate the loudest participant, emitting on change
    fn refresh_active_speaker(&mut self) {
        let current = self.speaker.current().map(|id| id.to_string());
        if current != self.last_speaker {
            self.last_speaker = current.clone();
            self.emit(SessionEvent::ActiveSpeakerChanged {
                participant_id: current,
            });
        }
    }

    /// Whether a media type is missing from the local set
    fn media_missing(&self, kind: MediaKind) -> bool {
        // The seeds report acquisition results independent of the
        // enable flags.
        match kind {
            MediaKind::Audio => self.media().audio_seed().is_none(),
            MediaKind::Video => self.media().video_seed().is_none(),
        }
    }

    fn media(&self) -> &LocalMediaSet {
        self.manager.media()
    }

    /// Emit one event to the rendering layer
    fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}
