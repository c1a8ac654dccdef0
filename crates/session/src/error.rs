//! Error types for the mesh session core

/// Result type alias using the session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session orchestration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local media capture unavailable (camera/microphone)
    ///
    /// Reported to the application; the session continues without that
    /// media type where feasible.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Description/ICE exchange for one peer did not complete
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// SDP offer/answer error
    #[error("SDP error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Relay/signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer link not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Outbound media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error concerns a single peer link
    ///
    /// Peer-scoped errors are surfaced per peer and never tear down the
    /// rest of the mesh.
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::Sdp(_)
                | Error::IceCandidate(_)
                | Error::PeerNotFound(_)
        )
    }

    /// Check if this error concerns local media capture or tracks
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaAcquisition(_) | Error::MediaTrack(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
