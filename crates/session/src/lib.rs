//! Mesh session core for real-time meetings
//!
//! Coordinates a mesh of audio/video peer connections among the members
//! of a shared session. A central relay carries connection setup
//! (signaling) only, never media. Two classifiers consume live media
//! signals: an active-speaker detector over per-participant audio
//! energy, and a gaze-direction classifier with temporal debouncing over
//! facial landmark samples.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Signaling relay (external, setup only)                  │
//! │  ↕ (RelayMessage over WebSocket)                         │
//! │  SessionCoordinator (single event loop)                  │
//! │  ├─ PeerLinkManager (mesh of PeerLinks)                  │
//! │  │   └─ Per-peer offer/answer/ICE state machine          │
//! │  ├─ ActiveSpeakerDetector (audio energy arg-max)         │
//! │  ├─ GazeClassifier (debounced discrete direction)        │
//! │  └─ LocalMediaSet (shared outbound track handles)        │
//! │     ↓ SessionEvent                                       │
//! │  Rendering layer (external subscriber)                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshmeet_session::SessionConfig;
//!
//! let config = SessionConfig {
//!     session_id: "meeting-42".to_string(),
//!     is_initiator: true,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.gaze.smoothing_window, 5);
//! ```
//!
//! ## Async usage
//!
//! ```no_run
//! use meshmeet_session::{
//!     LocalMediaSet, SessionConfig, SessionCoordinator, WebSocketRelay,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> meshmeet_session::Result<()> {
//! let config = SessionConfig {
//!     session_id: "meeting-42".to_string(),
//!     is_initiator: false,
//!     ..Default::default()
//! };
//!
//! let (relay, relay_rx) = WebSocketRelay::connect(&config.relay_url).await?;
//! let media = LocalMediaSet::new(None, None);
//!
//! let (coordinator, handle, mut events) = SessionCoordinator::new(
//!     config,
//!     "participant-local".to_string(),
//!     Arc::new(relay),
//!     relay_rx,
//!     media,
//! )?;
//!
//! tokio::spawn(coordinator.run());
//!
//! handle.set_video_enabled(false)?;
//! while let Some(event) = events.recv().await {
//!     // Feed the rendering layer.
//!     let _ = event;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod analyze;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use analyze::{
    ActiveSpeakerDetector, EyeSample, GazeClassifier, GazeDirection, GazeTransition,
    LandmarkFrame, Point,
};
pub use config::{GazeConfig, SessionConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{opus_capture_track, vp8_capture_track, LocalMediaSet, MediaKind};
pub use peer::{LinkState, PeerEvent, PeerLink, PeerLinkManager};
pub use session::{
    Participant, SessionCommand, SessionCoordinator, SessionEvent, SessionHandle,
};
pub use signaling::{IceCandidate, RelayMessage, SignalPayload, SignalingRelay, WebSocketRelay};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
