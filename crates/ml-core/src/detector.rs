use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use video_ingest::Frame;

/// Standard COCO indices covering drones and light aircraft.
pub const DEFAULT_TARGET_CLASSES: [i64; 2] = [4, 24];
/// Minimum raw detector score considered a candidate.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.75;

/// Single threat selected for the current tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatDescriptor {
    /// Bounding box as `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
    pub centroid: (f32, f32),
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub class_id: i64,
    pub detected_at: DateTime<Utc>,
}

impl ThreatDescriptor {
    /// Build a descriptor from corner coordinates; the centroid is the box midpoint.
    pub fn from_xyxy(bbox: [f32; 4], score: f32, class_id: i64) -> Self {
        let [x1, y1, x2, y2] = bbox;
        Self {
            bbox,
            centroid: ((x1 + x2) / 2.0, (y1 + y2) / 2.0),
            score: score.clamp(0.0, 1.0),
            class_id,
            detected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectionFault {
    #[error("detector rejected frame #{sequence}: {reason}")]
    InvalidFrame { sequence: u64, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Opaque detection capability consumed by the control loop.
///
/// Implementations must return at most one threat per frame; use
/// [`select_primary`] when the underlying model yields several candidates.
pub trait DetectionPort: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<Option<ThreatDescriptor>, DetectionFault>;
}

impl<D: DetectionPort + ?Sized> DetectionPort for Box<D> {
    fn analyze(&mut self, frame: &Frame) -> Result<Option<ThreatDescriptor>, DetectionFault> {
        (**self).analyze(frame)
    }
}

/// Pick the highest-scoring candidate. The earliest candidate wins ties.
pub fn select_primary<I>(candidates: I) -> Option<ThreatDescriptor>
where
    I: IntoIterator<Item = ThreatDescriptor>,
{
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(current) if current.score >= candidate.score => Some(current),
        _ => Some(candidate),
    })
}

/// Pre-selection filter on raw detector output.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub min_confidence: f32,
    /// Accepted class ids; empty accepts every class.
    pub class_ids: Vec<i64>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            class_ids: DEFAULT_TARGET_CLASSES.to_vec(),
        }
    }
}

impl CandidateFilter {
    pub fn accepts(&self, candidate: &ThreatDescriptor) -> bool {
        candidate.score >= self.min_confidence
            && (self.class_ids.is_empty() || self.class_ids.contains(&candidate.class_id))
    }

    /// Filter `candidates` and return the primary threat among the survivors.
    pub fn primary<I>(&self, candidates: I) -> Option<ThreatDescriptor>
    where
        I: IntoIterator<Item = ThreatDescriptor>,
    {
        select_primary(candidates.into_iter().filter(|c| self.accepts(c)))
    }
}
