//! Frame acquisition for the control loop.
//!
//! - `types`: frame buffer and capture error types.
//! - `channel`: bounded drop-oldest frame channel.
//! - `producer`: the acquisition thread and the [`FrameSource`] port.
//! - `ffmpeg`: FFmpeg rawvideo reader for devices, files and network feeds.
//! - `synthetic`: paced blank-frame source.
//! - `stop`: cooperative stop signal.

pub mod channel;
pub mod ffmpeg;
pub mod producer;
pub mod stop;
pub mod synthetic;
pub mod types;

pub use channel::{DEFAULT_QUEUE_CAPACITY, FrameChannel, PushOutcome};
pub use ffmpeg::{FfmpegSource, SourceKind};
pub use producer::{
    DEFAULT_CAPTURE_BACKOFF, FrameSource, ProducerStats, run_producer, spawn_producer,
};
pub use stop::StopSignal;
pub use synthetic::SyntheticSource;
pub use types::{CaptureError, Frame, FrameFormat};
