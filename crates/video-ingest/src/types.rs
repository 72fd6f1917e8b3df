use std::time::Instant;

use anyhow::Error;
use thiserror::Error;

/// Raw frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    /// Wall-clock capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Monotonic capture instant, used for latency and ordering.
    pub captured_at: Instant,
    /// Sequence number stamped by the producer; zero until pushed.
    pub sequence: u64,
    pub format: FrameFormat,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: i32, height: i32, timestamp_ms: i64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms,
            captured_at: Instant::now(),
            sequence: 0,
            format: FrameFormat::Bgr8,
        }
    }

    /// Geometric centre of the frame in pixel coordinates.
    pub fn center(&self) -> (f32, f32) {
        ((self.width / 2) as f32, (self.height / 2) as f32)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} ended")]
    EndOfStream { uri: String },
    /// The stop signal fired while waiting for a frame.
    #[error("capture interrupted by shutdown")]
    Interrupted,
    #[error(transparent)]
    Other(#[from] Error),
}
