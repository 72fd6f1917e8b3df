//! SkyShield tactical control kernel.
//!
//! - `tracker`: PID kinematic tracker producing control vectors.
//! - `interlock`: effector safety interlock.
//! - `effector`: effector hardware port and its simulated implementation.
//! - `status`: kernel status shared with observers.
//! - `events`: structured kernel events.
//! - `pipeline`: configuration, orchestration cycle, telemetry and supervisor.

pub mod effector;
pub mod events;
pub mod interlock;
pub mod pipeline;
pub mod status;
pub mod tracker;

pub use effector::{Effector, HardwareFault, SimulatedEffector, ThermalModel};
pub use events::{EventSink, KernelEvent, RecordingEventSink, TracingEventSink};
pub use interlock::{
    Authorization, DenialReason, Interlock, InterlockPhase, InterlockSettings, InterlockState,
    OperatingMode,
};
pub use pipeline::{
    RunOutcome,
    aggregator::{TelemetryAggregator, TelemetryBoard, TelemetrySample, TelemetrySnapshot, read_board},
    config::{KernelCliArgs, KernelConfig, SourceOptions, TelemetryOptions},
    cycle::{ControlLoop, KernelFault, LoopExit},
    run,
    sinks::{JsonLinesSink, LogSink, SinkError, TelemetrySink},
};
pub use status::{KernelStatus, SystemStatus};
pub use tracker::{ControlVector, KinematicTracker, PidGains, TrackerSettings, TrackerState};
