//! Peer connection lifecycle
//!
//! One [`PeerLink`] per remote participant, owned by the
//! [`PeerLinkManager`]. Links report everything asynchronous (local
//! candidates, remote tracks, transport state) as [`PeerEvent`]
//! messages into the session coordinator's loop; nothing in here calls
//! back into the application synchronously.

mod link;
mod manager;

pub use link::{LinkState, PeerLink};
pub use manager::PeerLinkManager;

use crate::signaling::SignalPayload;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Message from the peer layer into the session event loop
#[derive(Clone)]
pub enum PeerEvent {
    /// A payload to deliver to one remote participant via the relay
    SignalOut {
        /// Destination participant
        to: String,
        /// Offer, answer or candidate
        payload: SignalPayload,
    },

    /// The remote side added a media track
    RemoteTrack {
        /// Originating participant
        participant_id: String,
        /// The received track
        track: Arc<TrackRemote>,
    },

    /// A link's negotiation state changed (transport-driven)
    StateChanged {
        /// Affected participant
        participant_id: String,
        /// New state
        state: LinkState,
    },

    /// No remote description arrived within the bounded wait
    NegotiationTimedOut {
        /// Affected participant
        participant_id: String,
    },

    /// The transport failed after being established
    ConnectionFailed {
        /// Affected participant
        participant_id: String,
    },
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::SignalOut { to, payload } => f
                .debug_struct("SignalOut")
                .field("to", to)
                .field("payload", payload)
                .finish(),
            // The remote track itself has no useful debug form.
            PeerEvent::RemoteTrack { participant_id, .. } => f
                .debug_struct("RemoteTrack")
                .field("participant_id", participant_id)
                .finish_non_exhaustive(),
            PeerEvent::StateChanged {
                participant_id,
                state,
            } => f
                .debug_struct("StateChanged")
                .field("participant_id", participant_id)
                .field("state", state)
                .finish(),
            PeerEvent::NegotiationTimedOut { participant_id } => f
                .debug_struct("NegotiationTimedOut")
                .field("participant_id", participant_id)
                .finish(),
            PeerEvent::ConnectionFailed { participant_id } => f
                .debug_struct("ConnectionFailed")
                .field("participant_id", participant_id)
                .finish(),
        }
    }
}
