//! Local outbound media
//!
//! The capture layer is external; it hands this module track handles.
//! [`LocalMediaSet`] is the single source of truth for what every peer
//! link should currently be sending: the same underlying track instances
//! are shared read-only across all links, and every mutation (enable,
//! disable, replacement, screen share) goes through here before being
//! fanned out by the link manager.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Media types the session can degrade without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Shared local track handles and their enable state
pub struct LocalMediaSet {
    inner: RwLock<MediaState>,
}

struct MediaState {
    /// Microphone track (if acquired)
    microphone: Option<Arc<TrackLocalStaticSample>>,

    /// Camera track (if acquired); kept even while disabled so the
    /// handle can be restored
    camera: Option<Arc<TrackLocalStaticSample>>,

    /// Active screen-capture track; replaces the camera while present
    screen: Option<Arc<TrackLocalStaticSample>>,

    /// Whether camera video should currently be outbound
    video_enabled: bool,

    /// Whether microphone audio should currently be outbound
    audio_enabled: bool,
}

impl LocalMediaSet {
    /// Create a media set from the capture layer's track handles
    ///
    /// Either handle may be `None` when acquisition failed; the session
    /// continues without that media type.
    pub fn new(
        microphone: Option<Arc<TrackLocalStaticSample>>,
        camera: Option<Arc<TrackLocalStaticSample>>,
    ) -> Self {
        Self {
            inner: RwLock::new(MediaState {
                microphone,
                camera,
                screen: None,
                video_enabled: true,
                audio_enabled: true,
            }),
        }
    }

    /// Read the state, recovering from lock poisoning (the state is
    /// plain data, always consistent)
    fn read(&self) -> RwLockReadGuard<'_, MediaState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the state, recovering from lock poisoning
    fn write(&self) -> RwLockWriteGuard<'_, MediaState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The audio track that should currently be outbound
    pub fn current_audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        let state = self.read();
        if state.audio_enabled {
            state.microphone.clone()
        } else {
            None
        }
    }

    /// The video track that should currently be outbound
    ///
    /// Screen capture wins over the camera; a disabled camera yields
    /// nothing.
    pub fn current_video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        let state = self.read();
        state.screen.clone().or_else(|| {
            if state.video_enabled {
                state.camera.clone()
            } else {
                None
            }
        })
    }

    /// The audio handle a new link's sender should be created from,
    /// regardless of the current enable state
    pub fn audio_seed(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.read().microphone.clone()
    }

    /// The video handle a new link's sender should be created from,
    /// regardless of the current enable state
    pub fn video_seed(&self) -> Option<Arc<TrackLocalStaticSample>> {
        let state = self.read();
        state.screen.clone().or_else(|| state.camera.clone())
    }

    /// Toggle outbound camera video
    pub fn set_video_enabled(&self, enabled: bool) {
        self.write().video_enabled = enabled;
        debug!("Local video enabled: {}", enabled);
    }

    /// Toggle outbound microphone audio
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.write().audio_enabled = enabled;
        debug!("Local audio enabled: {}", enabled);
    }

    /// Replace the camera track handle (`None` releases it)
    pub fn set_camera(&self, track: Option<Arc<TrackLocalStaticSample>>) {
        self.write().camera = track;
    }

    /// Whether camera video is currently enabled
    pub fn video_enabled(&self) -> bool {
        self.read().video_enabled
    }

    /// Whether microphone audio is currently enabled
    pub fn audio_enabled(&self) -> bool {
        self.read().audio_enabled
    }

    /// Start a screen share with the given capture track
    pub fn start_screen(&self, track: Arc<TrackLocalStaticSample>) {
        self.write().screen = Some(track);
        debug!("Screen share started");
    }

    /// Stop the screen share; the camera (if still enabled) becomes the
    /// outbound video again
    pub fn stop_screen(&self) {
        self.write().screen = None;
        debug!("Screen share stopped");
    }

    /// Whether a screen share is active
    pub fn is_screen_sharing(&self) -> bool {
        self.read().screen.is_some()
    }
}

/// Build an Opus audio capture track
///
/// # Arguments
///
/// * `track_id` - Track identifier
/// * `stream_id` - Stream the track belongs to
pub fn opus_capture_track(track_id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        track_id.to_string(),
        stream_id.to_string(),
    ))
}

/// Build a VP8 video capture track
///
/// # Arguments
///
/// * `track_id` - Track identifier
/// * `stream_id` - Stream the track belongs to
pub fn vp8_capture_track(track_id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000, // Standard 90kHz clock for video
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        track_id.to_string(),
        stream_id.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_with_both() -> LocalMediaSet {
        LocalMediaSet::new(
            Some(opus_capture_track("audio-local", "stream-local")),
            Some(vp8_capture_track("video-local", "stream-local")),
        )
    }

    #[test]
    fn test_tracks_enabled_by_default() {
        let media = media_with_both();
        assert!(media.current_audio_track().is_some());
        assert!(media.current_video_track().is_some());
    }

    #[test]
    fn test_disable_video_hides_camera() {
        let media = media_with_both();

        media.set_video_enabled(false);
        assert!(media.current_video_track().is_none());
        // The handle itself survives for later restoration.
        assert!(media.video_seed().is_some());

        media.set_video_enabled(true);
        assert!(media.current_video_track().is_some());
    }

    #[test]
    fn test_screen_share_wins_over_camera() {
        let media = media_with_both();
        let camera = media.current_video_track().unwrap();

        let screen = vp8_capture_track("screen-local", "stream-local");
        media.start_screen(screen.clone());

        let outbound = media.current_video_track().unwrap();
        assert!(Arc::ptr_eq(&outbound, &screen));

        media.stop_screen();
        let restored = media.current_video_track().unwrap();
        assert!(Arc::ptr_eq(&restored, &camera));
    }

    #[test]
    fn test_screen_share_while_camera_disabled() {
        let media = media_with_both();
        media.set_video_enabled(false);

        let screen = vp8_capture_track("screen-local", "stream-local");
        media.start_screen(screen);
        assert!(media.current_video_track().is_some());

        // Stopping the share must not resurrect the disabled camera.
        media.stop_screen();
        assert!(media.current_video_track().is_none());
    }

    #[test]
    fn test_missing_capture_degrades() {
        let media = LocalMediaSet::new(None, None);
        assert!(media.current_audio_track().is_none());
        assert!(media.current_video_track().is_none());
        assert!(media.video_seed().is_none());
    }
}
