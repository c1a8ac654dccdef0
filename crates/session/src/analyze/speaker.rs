//! Active speaker detection
//!
//! Tracks the most recent audio energy sample per participant (the local
//! one included) and reports whichever participant is currently loudest.
//! Raw instantaneous samples win; there is deliberately no temporal
//! smoothing here, so the winner can change on every sample.

use std::collections::HashMap;
use tracing::debug;

/// Per-participant audio energy table with arg-max lookup
#[derive(Debug, Default)]
pub struct ActiveSpeakerDetector {
    /// Latest energy sample per participant
    levels: HashMap<String, f32>,
}

impl ActiveSpeakerDetector {
    /// Create an empty detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest energy sample for a participant, O(1)
    ///
    /// Non-finite samples are malformed input and are dropped.
    pub fn sample(&mut self, participant_id: &str, energy: f32) {
        if !energy.is_finite() {
            debug!(
                "Dropping non-finite energy sample for {}: {}",
                participant_id, energy
            );
            return;
        }

        self.levels.insert(participant_id.to_string(), energy);
    }

    /// The participant with the maximum recorded energy
    ///
    /// Returns `None` while the table is empty; ties between exactly
    /// equal samples resolve to an unspecified one of the tied entries.
    pub fn current(&self) -> Option<&str> {
        self.levels
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.as_str())
    }

    /// Forget a participant's samples (on departure)
    pub fn remove(&mut self, participant_id: &str) {
        self.levels.remove(participant_id);
    }

    /// Whether a participant is currently tracked
    pub fn contains(&self, participant_id: &str) -> bool {
        self.levels.contains_key(participant_id)
    }

    /// Number of tracked participants
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
