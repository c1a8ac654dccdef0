//! Relay wire protocol
//!
//! Events exchanged with the signaling relay. The relay is a transport:
//! it routes these messages to all members of a session or to a single
//! member, and never carries media.

use crate::analyze::GazeDirection;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// A message exchanged with the signaling relay
///
/// Field names follow the external contract (`sessionId`,
/// `participantId`, `iceCandidate`, ...); the enum tag is the event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RelayMessage {
    /// Announce the local session membership (outbound)
    Join {
        /// Target session identifier
        session_id: String,
    },

    /// A participant entered the session (inbound)
    ParticipantJoined {
        /// Relay-assigned participant identifier
        participant_id: String,
    },

    /// Connection negotiation payload (bidirectional)
    ///
    /// Exactly one of `offer`, `answer`, `ice_candidate` is present;
    /// `to` is set on outbound frames, `from` on inbound ones.
    Signal {
        /// Destination participant (outbound)
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,

        /// Originating participant (inbound, stamped by the relay)
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,

        /// SDP offer
        #[serde(skip_serializing_if = "Option::is_none")]
        offer: Option<String>,

        /// SDP answer
        #[serde(skip_serializing_if = "Option::is_none")]
        answer: Option<String>,

        /// ICE candidate
        #[serde(skip_serializing_if = "Option::is_none")]
        ice_candidate: Option<IceCandidate>,
    },

    /// A participant left the session (inbound)
    ParticipantLeft {
        /// Relay-assigned participant identifier
        participant_id: String,
    },

    /// Local gaze direction change (outbound)
    GazeEvent {
        /// Local participant identifier
        participant_id: String,
        /// Session the event belongs to
        session_id: String,
        /// Confirmed direction
        direction: GazeDirection,
        /// RFC 3339 wall-clock timestamp
        timestamp: String,
    },

    /// Remote gaze direction change (inbound)
    GazeUpdate {
        /// Remote participant identifier
        participant_id: String,
        /// Confirmed direction
        direction: GazeDirection,
    },

    /// Text chat message (bidirectional)
    Chat {
        /// Message body
        message: String,
    },

    /// Raise-hand notification (bidirectional)
    RaiseHand {
        /// Participant raising their hand
        participant_id: String,
    },
}

/// ICE candidate as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// SDP media stream identification tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// SDP media line index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// The exactly-one-of body of a `signal` frame
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    /// SDP offer
    Offer(String),
    /// SDP answer
    Answer(String),
    /// ICE candidate
    Candidate(IceCandidate),
}

impl RelayMessage {
    /// Build an outbound `signal` frame for one destination
    pub fn signal_to(to: String, payload: SignalPayload) -> Self {
        let (offer, answer, ice_candidate) = match payload {
            SignalPayload::Offer(sdp) => (Some(sdp), None, None),
            SignalPayload::Answer(sdp) => (None, Some(sdp), None),
            SignalPayload::Candidate(candidate) => (None, None, Some(candidate)),
        };

        RelayMessage::Signal {
            to: Some(to),
            from: None,
            offer,
            answer,
            ice_candidate,
        }
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::Serialization(format!("Failed to serialize relay message: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::Serialization(format!("Failed to deserialize relay message: {}", e))
        })
    }

    /// Get the wire event name
    pub fn event_name(&self) -> &str {
        match self {
            RelayMessage::Join { .. } => "join",
            RelayMessage::ParticipantJoined { .. } => "participant-joined",
            RelayMessage::Signal { .. } => "signal",
            RelayMessage::ParticipantLeft { .. } => "participant-left",
            RelayMessage::GazeEvent { .. } => "gaze-event",
            RelayMessage::GazeUpdate { .. } => "gaze-update",
            RelayMessage::Chat { .. } => "chat",
            RelayMessage::RaiseHand { .. } => "raise-hand",
        }
    }
}

/// Extract the exactly-one-of payload of an inbound `signal` frame
///
/// # Errors
///
/// Returns a serialization error when zero or more than one of the
/// payload fields is present.
pub fn signal_payload(
    offer: Option<String>,
    answer: Option<String>,
    ice_candidate: Option<IceCandidate>,
) -> crate::Result<SignalPayload> {
    match (offer, answer, ice_candidate) {
        (Some(sdp), None, None) => Ok(SignalPayload::Offer(sdp)),
        (None, Some(sdp), None) => Ok(SignalPayload::Answer(sdp)),
        (None, None, Some(candidate)) => Ok(SignalPayload::Candidate(candidate)),
        (None, None, None) => Err(crate::Error::Serialization(
            "signal frame carries no payload".to_string(),
        )),
        _ => Err(crate::Error::Serialization(
            "signal frame carries more than one payload".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_serialization() {
        let msg = RelayMessage::Join {
            session_id: "meeting-42".to_string(),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"event\":\"join\""));
        assert!(json.contains("\"sessionId\":\"meeting-42\""));

        let parsed = RelayMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_signal_offer_round_trip() {
        let msg = RelayMessage::signal_to(
            "peer-bob".to_string(),
            SignalPayload::Offer("v=0\r\no=- ...".to_string()),
        );

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"event\":\"signal\""));
        assert!(json.contains("\"offer\""));
        assert!(!json.contains("\"answer\""));
        assert!(!json.contains("\"iceCandidate\""));

        let parsed = RelayMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_signal_candidate_wire_names() {
        let msg = RelayMessage::signal_to(
            "peer-bob".to_string(),
            SignalPayload::Candidate(IceCandidate {
                candidate: "candidate:...".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }),
        );

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"iceCandidate\""));
        assert!(json.contains("\"sdpMid\""));
        assert!(json.contains("\"sdpMlineIndex\""));
    }

    #[test]
    fn test_signal_payload_exactly_one_of() {
        assert!(matches!(
            signal_payload(Some("sdp".to_string()), None, None),
            Ok(SignalPayload::Offer(_))
        ));
        assert!(matches!(
            signal_payload(None, Some("sdp".to_string()), None),
            Ok(SignalPayload::Answer(_))
        ));
        assert!(signal_payload(None, None, None).is_err());
        assert!(signal_payload(Some("a".to_string()), Some("b".to_string()), None).is_err());
    }

    #[test]
    fn test_gaze_event_wire_format() {
        let msg = RelayMessage::GazeEvent {
            participant_id: "peer-alice".to_string(),
            session_id: "meeting-42".to_string(),
            direction: GazeDirection::Left,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"event\":\"gaze-event\""));
        assert!(json.contains("\"direction\":\"left\""));

        let parsed = RelayMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_inbound_gaze_update_parses() {
        let json = r#"{"event":"gaze-update","participantId":"peer-bob","direction":"away"}"#;
        let parsed = RelayMessage::from_json(json).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::GazeUpdate {
                participant_id: "peer-bob".to_string(),
                direction: GazeDirection::Away,
            }
        );
    }

    #[test]
    fn test_event_name() {
        let msg = RelayMessage::ParticipantLeft {
            participant_id: "peer-bob".to_string(),
        };
        assert_eq!(msg.event_name(), "participant-left");
    }
}
