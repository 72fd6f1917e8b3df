//! Rolling telemetry aggregation for the control loop.
//!
//! The aggregator is owned by the control loop. Observers on other threads read
//! the last published [`TelemetrySnapshot`] through a [`TelemetryBoard`]; the
//! loop only ever `try_lock`s the board, so a slow reader can delay a snapshot
//! but never a tick.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use ml_core::ThreatDescriptor;
use serde::Serialize;

use crate::{
    status::{KernelStatus, SystemStatus},
    tracker::ControlVector,
};

/// Frame-rate samples averaged into the smoothed FPS.
pub const FPS_WINDOW: usize = 50;
/// Telemetry samples retained for inspection.
pub const SAMPLE_LOG_CAPACITY: usize = 150;

#[derive(Clone, Debug, PartialEq, Serialize)]
/// Per-tick telemetry record handed to sinks.
pub struct TelemetrySample {
    pub timestamp_ms: i64,
    pub frame: u64,
    pub instant_fps: f32,
    pub smoothed_fps: f32,
    /// Time from capture to the end of processing.
    pub frame_age_ms: f32,
    pub status: KernelStatus,
    pub is_target_locked: bool,
    pub is_engagement_active: bool,
    pub control: Option<ControlVector>,
    pub threat: Option<ThreatDescriptor>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
/// Read-only view published to external observers.
pub struct TelemetrySnapshot {
    pub system: SystemStatus,
    pub smoothed_fps: f32,
    /// Per-frame processing budget implied by the smoothed frame rate.
    pub latency_ms: f32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub engagements: u64,
    pub uptime_secs: f64,
    pub latest: Option<TelemetrySample>,
}

pub type TelemetryBoard = Arc<Mutex<TelemetrySnapshot>>;

/// Copy the latest snapshot out of a board, blocking only the observer.
pub fn read_board(board: &TelemetryBoard) -> TelemetrySnapshot {
    match board.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub struct TelemetryAggregator {
    fps_window: VecDeque<f32>,
    log: VecDeque<TelemetrySample>,
    snapshot: TelemetrySnapshot,
    board: TelemetryBoard,
    started: Instant,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self {
            fps_window: VecDeque::with_capacity(FPS_WINDOW),
            log: VecDeque::with_capacity(SAMPLE_LOG_CAPACITY),
            snapshot: TelemetrySnapshot::default(),
            board: Arc::new(Mutex::new(TelemetrySnapshot::default())),
            started: Instant::now(),
        }
    }

    /// Handle observers use to read snapshots.
    pub fn board(&self) -> TelemetryBoard {
        self.board.clone()
    }

    /// Fold one frame interval into the window; returns `(instant, smoothed)` FPS.
    pub fn record_interval(&mut self, elapsed: Duration) -> (f32, f32) {
        let secs = elapsed.as_secs_f32();
        let instant = if secs > 0.0 { 1.0 / secs } else { 0.0 };
        if self.fps_window.len() == FPS_WINDOW {
            self.fps_window.pop_front();
        }
        self.fps_window.push_back(instant);
        (instant, self.smoothed_fps())
    }

    /// Arithmetic mean over the FPS window.
    pub fn smoothed_fps(&self) -> f32 {
        if self.fps_window.is_empty() {
            return 0.0;
        }
        self.fps_window.iter().sum::<f32>() / self.fps_window.len() as f32
    }

    /// Record a completed tick and publish the resulting snapshot.
    pub fn record(&mut self, sample: TelemetrySample, system: SystemStatus, frames_dropped: u64) {
        let snapshot = &mut self.snapshot;
        snapshot.system = system;
        snapshot.smoothed_fps = sample.smoothed_fps;
        snapshot.latency_ms = if sample.smoothed_fps > 0.0 {
            1000.0 / sample.smoothed_fps
        } else {
            0.0
        };
        snapshot.frames_processed = snapshot.frames_processed.wrapping_add(1);
        snapshot.frames_dropped = frames_dropped;
        if sample.threat.is_some() {
            snapshot.detections = snapshot.detections.wrapping_add(1);
        }
        if sample.is_engagement_active {
            snapshot.engagements = snapshot.engagements.wrapping_add(1);
        }
        snapshot.uptime_secs = self.started.elapsed().as_secs_f64();
        snapshot.latest = Some(sample.clone());

        if self.log.len() == SAMPLE_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(sample);
        self.publish();
    }

    /// Update the status outside a tick (boot, shutdown, fault).
    pub fn record_status(&mut self, system: SystemStatus) {
        self.snapshot.system = system;
        self.snapshot.uptime_secs = self.started.elapsed().as_secs_f64();
        self.publish();
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.clone()
    }

    pub fn history(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.log.iter()
    }

    fn publish(&self) {
        if let Ok(mut guard) = self.board.try_lock() {
            *guard = self.snapshot.clone();
        }
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new()
    }
}
