//! Detection port consumed by the control loop.
//!
//! The neural model itself lives outside this workspace; this crate only fixes
//! the shape of what it hands back and how competing candidates are resolved.

pub mod detector;

pub use detector::{
    CandidateFilter, DEFAULT_MIN_CONFIDENCE, DEFAULT_TARGET_CLASSES, DetectionFault,
    DetectionPort, ThreatDescriptor, select_primary,
};
