//! Watchdog bounding the latency of detection calls.
//!
//! The control loop marks the start and end of every detection call. A
//! watchdog thread polls that mark; when a call stays in flight past the
//! deadline, it records the stall, stops acquisition and closes the frame
//! channel. The loop notices the stall once the call returns and shuts down
//! through the kernel-fault path instead of acting on the stale result.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{select, tick};
use tracing::error;
use video_ingest::{FrameChannel, StopSignal};

use crate::pipeline::telemetry;

/// Sleep interval between watchdog health checks.
pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

const IDLE: u64 = 0;

/// Start mark of the in-flight detection call.
pub struct DetectionHealth {
    origin: Instant,
    started_ms: AtomicU64,
}

impl DetectionHealth {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            started_ms: AtomicU64::new(IDLE),
        }
    }

    pub fn begin(&self) {
        self.started_ms.store(self.millis(Instant::now()), Ordering::SeqCst);
    }

    pub fn end(&self) {
        self.started_ms.store(IDLE, Ordering::SeqCst);
    }

    /// How long the current call has been running, if one is in flight.
    pub fn in_flight(&self, now: Instant) -> Option<Duration> {
        match self.started_ms.load(Ordering::SeqCst) {
            IDLE => None,
            started => Some(Duration::from_millis(
                self.millis(now).saturating_sub(started),
            )),
        }
    }

    // Offset by one so that a call starting at the origin is not read as idle.
    fn millis(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_millis() as u64 + 1
    }
}

impl Default for DetectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state exposing watchdog triggers to the control loop.
pub struct WatchdogState {
    triggered: AtomicBool,
    stalled_for: Mutex<Option<Duration>>,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            stalled_for: Mutex::new(None),
        }
    }

    /// Record the stall duration and mark the watchdog as fired.
    pub fn arm(&self, stalled_for: Duration) {
        if let Ok(mut guard) = self.stalled_for.lock() {
            *guard = Some(stalled_for);
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn stalled_for(&self) -> Option<Duration> {
        match self.stalled_for.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// Check once; returns whether the watchdog fired.
pub fn check_detection(
    health: &DetectionHealth,
    deadline: Duration,
    now: Instant,
    stop: &StopSignal,
    channel: &FrameChannel,
    state: &WatchdogState,
) -> bool {
    let Some(elapsed) = health.in_flight(now) else {
        return false;
    };
    if elapsed <= deadline {
        return false;
    }

    error!(
        elapsed_ms = elapsed.as_millis() as u64,
        deadline_ms = deadline.as_millis() as u64,
        "Watchdog detected stalled detection call; stopping acquisition"
    );
    metrics::counter!("skyshield_watchdog_trips_total").increment(1);
    state.arm(elapsed);
    stop.stop();
    channel.close();
    true
}

/// Spawn the watchdog thread. It exits when `stop` fires or after tripping.
pub fn spawn_watchdog(
    health: Arc<DetectionHealth>,
    deadline: Duration,
    stop: Arc<StopSignal>,
    channel: Arc<FrameChannel>,
    state: Arc<WatchdogState>,
) -> io::Result<JoinHandle<()>> {
    telemetry::spawn_thread("detection-watchdog", move || {
        let ticker = tick(WATCHDOG_POLL_INTERVAL);
        let stopped = stop.receiver();
        loop {
            select! {
                recv(stopped) -> _ => break,
                recv(ticker) -> _ => {
                    if check_detection(&health, deadline, Instant::now(), &stop, &channel, &state) {
                        break;
                    }
                }
            }
        }
    })
}
