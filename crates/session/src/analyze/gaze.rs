//! Gaze direction classification with temporal debouncing
//!
//! Turns a stream of raw iris/eye landmark samples into a stable,
//! debounced discrete direction. The landmark detector itself is an
//! external capability; it hands this classifier one [`LandmarkFrame`]
//! per video frame (or `None` when no face was found).
//!
//! Pipeline per sample: horizontal iris ratio (mirror invariant) →
//! rolling-window smoothing → threshold classification (vertical takes
//! priority) → two-consecutive-sample confirmation → emit rate limit.

use crate::config::GazeConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Discrete gaze direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Center,
    Left,
    Right,
    Top,
    Bottom,
    Away,
}

/// A 2D landmark point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Euclidean distance to another point
    fn distance(&self, other: &Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Landmarks for one eye
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeSample {
    /// Inner eye corner (nose side)
    pub inner: Point,
    /// Outer eye corner (temple side)
    pub outer: Point,
    /// Iris center
    pub iris: Point,
}

/// One face-landmark observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Left eye landmarks
    pub left: EyeSample,
    /// Right eye landmarks
    pub right: EyeSample,
    /// Source frame height in pixels (vertical normalization)
    pub frame_height: f32,
}

/// A confirmed, emitted direction change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GazeTransition {
    /// The newly confirmed direction
    pub direction: GazeDirection,
    /// Sample clock timestamp of the confirmation
    pub timestamp_ms: u64,
}

/// Candidate direction awaiting confirmation
#[derive(Debug, Clone, Copy)]
struct PendingDirection {
    direction: GazeDirection,
    first_seen_ms: u64,
    count: u32,
}

/// Per-session gaze classifier state machine
///
/// All state lives in instance fields; one classifier is constructed per
/// local session and driven by the coordinator's sampling loop.
/// [`GazeClassifier::sample`] returns the transition to broadcast (if
/// any) instead of invoking callbacks, so emission is never re-entrant
/// from inside the sampling path.
#[derive(Debug)]
pub struct GazeClassifier {
    config: GazeConfig,

    /// Rolling window of horizontal scores, oldest evicted first
    history: VecDeque<f32>,

    /// Last confirmed direction (updated even when emission is
    /// rate-limited)
    last_confirmed: GazeDirection,

    /// Candidate awaiting consecutive confirmation
    pending: Option<PendingDirection>,

    /// Sample clock of the last frame containing a face
    last_face_ms: Option<u64>,

    /// Sample clock of the last emitted transition
    last_emit_ms: Option<u64>,
}

impl GazeClassifier {
    /// Create a classifier with the given tuning
    pub fn new(config: GazeConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            last_confirmed: GazeDirection::Center,
            pending: None,
            last_face_ms: None,
            last_emit_ms: None,
        }
    }

    /// The last confirmed direction
    pub fn current(&self) -> GazeDirection {
        self.last_confirmed
    }

    /// Feed one observation
    ///
    /// `frame` is `None` when the detector found no face. `now_ms` is a
    /// monotonic sample clock in milliseconds.
    ///
    /// Returns the confirmed direction change to broadcast, or `None`
    /// when the sample did not confirm a change or emission was
    /// rate-limited (the change is still recorded internally).
    pub fn sample(&mut self, frame: Option<&LandmarkFrame>, now_ms: u64) -> Option<GazeTransition> {
        let frame = match frame {
            Some(frame) => frame,
            None => return self.sample_missing_face(now_ms),
        };

        let (horizontal, vertical) = match Self::scores(frame) {
            Some(scores) => scores,
            None => {
                // Malformed landmark input costs one dropped sample.
                debug!("Dropping malformed landmark frame");
                return None;
            }
        };

        self.last_face_ms = Some(now_ms);

        self.history.push_back(horizontal);
        while self.history.len() > self.config.smoothing_window {
            self.history.pop_front();
        }
        let smoothed = self.history.iter().sum::<f32>() / self.history.len() as f32;

        let direction = self.classify(smoothed, vertical);
        self.observe(direction, now_ms)
    }

    /// Handle a frame with no detected face
    ///
    /// `away` is classified only once the face-less gap exceeds the
    /// configured timeout, never on the first missed frame.
    fn sample_missing_face(&mut self, now_ms: u64) -> Option<GazeTransition> {
        match self.last_face_ms {
            None => {
                // No face seen yet: start the gap clock.
                self.last_face_ms = Some(now_ms);
                None
            }
            Some(last_face) if now_ms.saturating_sub(last_face) > self.config.away_timeout_ms => {
                self.observe(GazeDirection::Away, now_ms)
            }
            Some(_) => None,
        }
    }

    /// Raw horizontal/vertical scores for one frame
    ///
    /// Returns `None` for malformed input: non-finite coordinates,
    /// degenerate eye width or a non-positive frame height.
    fn scores(frame: &LandmarkFrame) -> Option<(f32, f32)> {
        if frame.frame_height <= 0.0 {
            return None;
        }

        let left = Self::eye_ratio(&frame.left)?;
        let right = Self::eye_ratio(&frame.right)?;

        // Average the left ratio and the complement of the right one;
        // the result is invariant to camera mirroring.
        let horizontal = (left + (1.0 - right)) / 2.0;

        let iris_y = (frame.left.iris.y + frame.right.iris.y) / 2.0;
        let left_center_y = (frame.left.inner.y + frame.left.outer.y) / 2.0;
        let right_center_y = (frame.right.inner.y + frame.right.outer.y) / 2.0;
        let eye_center_y = (left_center_y + right_center_y) / 2.0;
        let vertical = (iris_y - eye_center_y) / frame.frame_height;

        if !horizontal.is_finite() || !vertical.is_finite() {
            return None;
        }

        Some((horizontal, vertical))
    }

    /// Iris offset along the eye axis as a fraction of eye width
    fn eye_ratio(eye: &EyeSample) -> Option<f32> {
        let width = eye.inner.distance(&eye.outer);
        if !width.is_finite() || width <= f32::EPSILON {
            return None;
        }

        Some(eye.iris.distance(&eye.inner) / width)
    }

    /// Threshold classification; vertical offsets take priority
    fn classify(&self, horizontal: f32, vertical: f32) -> GazeDirection {
        if vertical < self.config.top_threshold {
            GazeDirection::Top
        } else if vertical > self.config.bottom_threshold {
            GazeDirection::Bottom
        } else if horizontal < self.config.left_threshold {
            GazeDirection::Left
        } else if horizontal > self.config.right_threshold {
            GazeDirection::Right
        } else {
            GazeDirection::Center
        }
    }

    /// Debounce and rate-limit one classification result
    fn observe(&mut self, direction: GazeDirection, now_ms: u64) -> Option<GazeTransition> {
        if direction == self.last_confirmed {
            // A single differing sample never accumulates across
            // non-contiguous occurrences.
            self.pending = None;
            return None;
        }

        let count = match self.pending.as_mut() {
            Some(pending) if pending.direction == direction => {
                pending.count += 1;
                pending.count
            }
            _ => {
                self.pending = Some(PendingDirection {
                    direction,
                    first_seen_ms: now_ms,
                    count: 1,
                });
                1
            }
        };

        if count < self.config.confirm_samples {
            return None;
        }

        // Confirmed: becomes current even if emission is suppressed.
        let held_ms = self
            .pending
            .map_or(0, |p| now_ms.saturating_sub(p.first_seen_ms));
        self.pending = None;
        self.last_confirmed = direction;
        debug!("Gaze direction {:?} confirmed after {}ms", direction, held_ms);

        let emit = self
            .last_emit_ms
            .map_or(true, |last| {
                now_ms.saturating_sub(last) >= self.config.min_emit_interval_ms
            });

        if !emit {
            debug!(
                "Gaze change to {:?} confirmed but rate-limited",
                direction
            );
            return None;
        }

        self.last_emit_ms = Some(now_ms);
        Some(GazeTransition {
            direction,
            timestamp_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A frame whose smoothed scores classify as the given direction
    /// (assuming an empty or agreeing history window)
    fn frame_for(direction: GazeDirection) -> LandmarkFrame {
        let horizontal = match direction {
            GazeDirection::Left => 0.2,
            GazeDirection::Right => 0.8,
            _ => 0.5,
        };
        let iris_dy = match direction {
            GazeDirection::Top => -20.0,
            GazeDirection::Bottom => 24.0,
            _ => 0.0,
        };

        // Eyes of width 100px at y=100 in a 240px-high frame; the iris
        // sits at `horizontal` along each eye axis (mirrored eyes, so
        // both contribute the same mirror-invariant score).
        LandmarkFrame {
            left: EyeSample {
                inner: Point { x: 100.0, y: 100.0 },
                outer: Point { x: 200.0, y: 100.0 },
                iris: Point {
                    x: 100.0 + horizontal * 100.0,
                    y: 100.0 + iris_dy,
                },
            },
            right: EyeSample {
                inner: Point { x: 400.0, y: 100.0 },
                outer: Point { x: 300.0, y: 100.0 },
                iris: Point {
                    x: 400.0 - (1.0 - horizontal) * 100.0,
                    y: 100.0 + iris_dy,
                },
            },
            frame_height: 240.0,
        }
    }

    fn classifier() -> GazeClassifier {
        GazeClassifier::new(GazeConfig::default())
    }

    #[test]
    fn test_initial_direction_is_center() {
        assert_eq!(classifier().current(), GazeDirection::Center);
    }

    #[test]
    fn test_two_consecutive_samples_confirm_and_emit_once() {
        let mut gaze = classifier();

        let first = gaze.sample(Some(&frame_for(GazeDirection::Left)), 0);
        assert!(first.is_none());

        let second = gaze.sample(Some(&frame_for(GazeDirection::Left)), 33);
        let transition = second.expect("second consecutive sample must emit");
        assert_eq!(transition.direction, GazeDirection::Left);
        assert_eq!(gaze.current(), GazeDirection::Left);

        // Steady gaze produces no further emissions.
        assert!(gaze.sample(Some(&frame_for(GazeDirection::Left)), 66).is_none());
    }

    #[test]
    fn test_single_differing_sample_never_emits() {
        let mut gaze = classifier();

        assert!(gaze.sample(Some(&frame_for(GazeDirection::Left)), 0).is_none());
        // The isolated sample is discarded by the agreeing one that
        // follows; the pending record must reset rather than accumulate.
        assert!(gaze.sample(Some(&frame_for(GazeDirection::Center)), 33).is_none());
        assert!(gaze.sample(Some(&frame_for(GazeDirection::Left)), 66).is_none());
        assert_eq!(gaze.current(), GazeDirection::Center);

        let transition = gaze.sample(Some(&frame_for(GazeDirection::Left)), 99);
        assert_eq!(
            transition.map(|t| t.direction),
            Some(GazeDirection::Left)
        );
    }

    #[test]
    fn test_rate_limit_suppresses_emission_but_records_state() {
        let mut gaze = classifier();

        gaze.sample(Some(&frame_for(GazeDirection::Left)), 0);
        assert!(gaze.sample(Some(&frame_for(GazeDirection::Left)), 30).is_some());

        // Confirmed within 300ms of the last emission: recorded, not
        // broadcast.
        gaze.sample(Some(&frame_for(GazeDirection::Right)), 60);
        let suppressed = gaze.sample(Some(&frame_for(GazeDirection::Right)), 90);
        assert!(suppressed.is_none());
        assert_eq!(gaze.current(), GazeDirection::Right);

        // Past the rate limit the next confirmed change emits again.
        gaze.sample(Some(&frame_for(GazeDirection::Center)), 400);
        let emitted = gaze.sample(Some(&frame_for(GazeDirection::Center)), 430);
        assert_eq!(emitted.map(|t| t.direction), Some(GazeDirection::Center));
    }

    #[test]
    fn test_away_requires_continuous_gap() {
        let mut gaze = classifier();

        gaze.sample(Some(&frame_for(GazeDirection::Center)), 0);

        // First missed frames inside the window classify nothing.
        assert!(gaze.sample(None, 200).is_none());
        assert!(gaze.sample(None, 900).is_none());
        assert_eq!(gaze.current(), GazeDirection::Center);

        // Past 1000ms the face-less samples classify as away and
        // debounce like any other direction.
        assert!(gaze.sample(None, 1100).is_none());
        let transition = gaze.sample(None, 1150);
        assert_eq!(transition.map(|t| t.direction), Some(GazeDirection::Away));
    }

    #[test]
    fn test_away_clock_starts_on_first_missed_frame() {
        let mut gaze = classifier();

        // No face ever seen: the gap is measured from the first miss.
        assert!(gaze.sample(None, 500).is_none());
        assert!(gaze.sample(None, 1400).is_none());
        assert!(gaze.sample(None, 1600).is_none());
        let transition = gaze.sample(None, 1650);
        assert_eq!(transition.map(|t| t.direction), Some(GazeDirection::Away));
    }

    #[test]
    fn test_face_return_recovers_from_away() {
        let mut gaze = classifier();

        gaze.sample(None, 0);
        gaze.sample(None, 1100);
        gaze.sample(None, 1150);
        assert_eq!(gaze.current(), GazeDirection::Away);

        gaze.sample(Some(&frame_for(GazeDirection::Center)), 1600);
        let transition = gaze.sample(Some(&frame_for(GazeDirection::Center)), 1650);
        assert_eq!(transition.map(|t| t.direction), Some(GazeDirection::Center));
    }

    #[test]
    fn test_vertical_takes_priority_over_horizontal() {
        let mut gaze = classifier();

        let mut frame = frame_for(GazeDirection::Top);
        // Push the irises far left (toward the left eye's inner corner
        // and the right eye's outer corner); the vertical offset must
        // still win.
        frame.left.iris.x = frame.left.inner.x + 10.0;
        frame.right.iris.x = frame.right.outer.x + 10.0;

        gaze.sample(Some(&frame), 0);
        let transition = gaze.sample(Some(&frame), 33);
        assert_eq!(transition.map(|t| t.direction), Some(GazeDirection::Top));
    }

    #[test]
    fn test_smoothing_window_evicts_oldest() {
        let mut gaze = classifier();

        // Five hard-left samples fill the window...
        for i in 0..5 {
            gaze.sample(Some(&frame_for(GazeDirection::Left)), i * 33);
        }
        assert_eq!(gaze.current(), GazeDirection::Left);

        // ...then sustained center samples wash the window mean back
        // over the threshold within the window capacity.
        let mut last = None;
        for i in 5..12 {
            if let Some(t) = gaze.sample(Some(&frame_for(GazeDirection::Center)), i * 33 + 400) {
                last = Some(t.direction);
            }
        }
        assert_eq!(last, Some(GazeDirection::Center));
        assert!(gaze.history.len() <= 5);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut gaze = classifier();

        let mut degenerate = frame_for(GazeDirection::Left);
        degenerate.left.outer = degenerate.left.inner; // zero eye width

        assert!(gaze.sample(Some(&degenerate), 0).is_none());
        assert!(gaze.history.is_empty());

        let mut nan = frame_for(GazeDirection::Left);
        nan.right.iris.x = f32::NAN;
        assert!(gaze.sample(Some(&nan), 33).is_none());

        let mut flat = frame_for(GazeDirection::Left);
        flat.frame_height = 0.0;
        assert!(gaze.sample(Some(&flat), 66).is_none());

        // A dropped sample is not fatal: valid frames keep classifying.
        gaze.sample(Some(&frame_for(GazeDirection::Left)), 99);
        let transition = gaze.sample(Some(&frame_for(GazeDirection::Left)), 132);
        assert_eq!(transition.map(|t| t.direction), Some(GazeDirection::Left));
    }

    #[test]
    fn test_horizontal_score_formula() {
        // Both eyes contribute the same value: the left ratio and the
        // complement of the right ratio agree for a consistent gaze.
        let (horizontal, _) = GazeClassifier::scores(&frame_for(GazeDirection::Left)).unwrap();
        assert!((horizontal - 0.2).abs() < 1e-4);

        let (horizontal, _) = GazeClassifier::scores(&frame_for(GazeDirection::Right)).unwrap();
        assert!((horizontal - 0.8).abs() < 1e-4);

        let (horizontal, vertical) =
            GazeClassifier::scores(&frame_for(GazeDirection::Center)).unwrap();
        assert!((horizontal - 0.5).abs() < 1e-4);
        assert!(vertical.abs() < 1e-4);
    }
}
