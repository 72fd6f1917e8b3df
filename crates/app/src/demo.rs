//! Scripted detector for running the kernel without a model.
//!
//! A drone spirals in towards the frame centre, drifts out again and leaves
//! the field of view for a while, so a demo run walks through acquisition,
//! lock, engagement, cooldown and target loss. Each frame also carries decoy
//! candidates that the candidate filter must reject.

use std::f32::consts::TAU;

use ml_core::{CandidateFilter, DetectionFault, DetectionPort, ThreatDescriptor};
use video_ingest::Frame;

const DRONE_CLASS: i64 = 4;
const PERSON_CLASS: i64 = 0;
const BIRD_CLASS: i64 = 14;
const BOX_HALF_SIZE: f32 = 24.0;

pub struct OrbitingTarget {
    filter: CandidateFilter,
    /// Frames per approach/retreat cycle, including the gap.
    cycle_frames: u64,
    /// Trailing frames of each cycle with nothing in view.
    gap_frames: u64,
    /// Frames per revolution.
    orbit_frames: u64,
}

impl OrbitingTarget {
    pub fn new(filter: CandidateFilter) -> Self {
        Self {
            filter,
            cycle_frames: 300,
            gap_frames: 45,
            orbit_frames: 90,
        }
    }

    fn candidates(&self, frame: &Frame) -> Vec<ThreatDescriptor> {
        let phase = frame.sequence % self.cycle_frames;
        let visible = self.cycle_frames - self.gap_frames;
        let (cx, cy) = frame.center();

        // Decoys: a confident person near the centre and a low-score bird.
        let mut candidates = vec![
            around((cx + 60.0, cy + 40.0), 0.97, PERSON_CLASS),
            around((cx - 200.0, cy - 120.0), 0.55, BIRD_CLASS),
        ];
        if phase >= visible {
            return candidates;
        }

        // Radius shrinks to zero at mid-cycle, then grows back.
        let half = visible as f32 / 2.0;
        let closeness = 1.0 - (phase as f32 - half).abs() / half;
        let max_radius = (cx.min(cy) - BOX_HALF_SIZE).max(0.0);
        let radius = max_radius * (1.0 - closeness);
        let angle = TAU * (frame.sequence % self.orbit_frames) as f32 / self.orbit_frames as f32;
        let score = 0.8 + 0.19 * closeness;

        candidates.push(around(
            (cx + radius * angle.cos(), cy + radius * angle.sin()),
            score,
            DRONE_CLASS,
        ));
        candidates
    }
}

impl DetectionPort for OrbitingTarget {
    fn analyze(&mut self, frame: &Frame) -> Result<Option<ThreatDescriptor>, DetectionFault> {
        if frame.width <= 0 || frame.height <= 0 {
            return Err(DetectionFault::InvalidFrame {
                sequence: frame.sequence,
                reason: format!("empty geometry {}x{}", frame.width, frame.height),
            });
        }
        Ok(self.filter.primary(self.candidates(frame)))
    }
}

fn around(centre: (f32, f32), score: f32, class_id: i64) -> ThreatDescriptor {
    let (x, y) = centre;
    ThreatDescriptor::from_xyxy(
        [
            x - BOX_HALF_SIZE,
            y - BOX_HALF_SIZE,
            x + BOX_HALF_SIZE,
            y + BOX_HALF_SIZE,
        ],
        score,
        class_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Frame {
        let mut frame = Frame::new(Vec::new(), 1280, 720, 0);
        frame.sequence = sequence;
        frame
    }

    #[test]
    fn decoys_never_win() {
        let mut detector = OrbitingTarget::new(CandidateFilter::default());
        for sequence in 0..600 {
            if let Some(threat) = detector.analyze(&frame(sequence)).expect("valid frame") {
                assert_eq!(threat.class_id, DRONE_CLASS);
            }
        }
    }

    #[test]
    fn target_reaches_centre_mid_approach() {
        let mut detector = OrbitingTarget::new(CandidateFilter::default());
        let mid = (300 - 45) / 2;
        let threat = detector
            .analyze(&frame(mid))
            .expect("valid frame")
            .expect("target visible");
        let (cx, cy) = (640.0, 360.0);
        assert!((threat.centroid.0 - cx).abs() < 12.0);
        assert!((threat.centroid.1 - cy).abs() < 12.0);
        assert!(threat.score > 0.92);
    }

    #[test]
    fn gap_frames_have_no_target() {
        let mut detector = OrbitingTarget::new(CandidateFilter::default());
        for sequence in 255..300 {
            assert!(detector.analyze(&frame(sequence)).expect("valid").is_none());
        }
    }

    #[test]
    fn empty_frames_are_rejected() {
        let mut detector = OrbitingTarget::new(CandidateFilter::default());
        let broken = Frame::new(Vec::new(), 0, 0, 0);
        assert!(matches!(
            detector.analyze(&broken),
            Err(DetectionFault::InvalidFrame { .. })
        ));
    }
}
