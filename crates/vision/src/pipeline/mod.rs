//! Kernel supervisor wiring the acquisition producer, the detection watchdog
//! and the control loop together.
//!
//! - `config`: manifest and CLI configuration.
//! - `cycle`: the orchestration cycle consuming frames.
//! - `aggregator`: rolling telemetry and observer snapshots.
//! - `sinks`: push-based telemetry sinks.
//! - `watchdog`: detection deadline monitoring.
//! - `telemetry`: tracing subscriber and metrics exporter setup.

pub mod aggregator;
pub mod config;
pub mod cycle;
pub mod sinks;
pub mod telemetry;
pub mod watchdog;

use std::sync::{Arc, Mutex, Once};

use anyhow::{Context, Result};
use ml_core::DetectionPort;
use tracing::{info, warn};
use video_ingest::{FrameChannel, FrameSource, ProducerStats, StopSignal, spawn_producer};

use crate::{
    effector::Effector,
    pipeline::{
        aggregator::TelemetrySnapshot,
        config::KernelConfig,
        cycle::{ControlLoop, LoopExit},
        sinks::{JsonLinesSink, LogSink},
        watchdog::{DetectionHealth, WatchdogState, spawn_watchdog},
    },
};

/// What a kernel run ended with.
#[derive(Debug)]
pub struct RunOutcome {
    pub exit: LoopExit,
    pub telemetry: TelemetrySnapshot,
    pub capture: ProducerStats,
}

type InterruptTarget = (Arc<StopSignal>, Arc<FrameChannel>);

static INTERRUPT_TARGET: Mutex<Option<InterruptTarget>> = Mutex::new(None);

/// Route Ctrl+C to the current run's stop signal and frame channel.
fn install_interrupt_handler(stop: Arc<StopSignal>, channel: Arc<FrameChannel>) {
    static CTRL_HANDLER: Once = Once::new();

    if let Ok(mut target) = INTERRUPT_TARGET.lock() {
        *target = Some((stop, channel));
    }

    CTRL_HANDLER.call_once(|| {
        if let Err(err) = ctrlc::set_handler(|| {
            if let Ok(target) = INTERRUPT_TARGET.lock() {
                if let Some((stop, channel)) = target.as_ref() {
                    stop.stop();
                    channel.close();
                }
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
}

/// Run the kernel until the source is stopped (Ctrl+C) or a kernel fault occurs.
pub fn run<S, D, E>(config: KernelConfig, source: S, detector: D, effector: E) -> Result<RunOutcome>
where
    S: FrameSource + 'static,
    D: DetectionPort,
    E: Effector,
{
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    telemetry::init_metrics_exporter(&config.telemetry)?;

    let kernel_span = tracing::info_span!(
        "skyshield.kernel",
        source = %source.describe(),
        mode = %config.operating_mode,
        queue = config.queue_capacity,
        confidence_floor = config.confidence_floor,
        cooldown_s = config.cooldown_seconds
    );
    let _kernel_guard = kernel_span.enter();

    let stop = Arc::new(StopSignal::new());
    let channel = Arc::new(FrameChannel::new(config.queue_capacity));
    install_interrupt_handler(stop.clone(), channel.clone());

    let mut control = ControlLoop::new(&config, detector, effector, channel.clone(), stop.clone())
        .with_sink(LogSink::default());
    if let Some(path) = config.telemetry.sample_log_path.as_ref() {
        let sink = JsonLinesSink::create(path)
            .with_context(|| format!("failed to open sample log {}", path.display()))?;
        control = control.with_sink(sink);
    }

    let watchdog_handle = match config.detection_deadline() {
        Some(deadline) => {
            let health = Arc::new(DetectionHealth::new());
            let state = Arc::new(WatchdogState::new());
            let handle = spawn_watchdog(
                health.clone(),
                deadline,
                stop.clone(),
                channel.clone(),
                state.clone(),
            )
            .context("failed to spawn detection watchdog")?;
            control = control.with_watchdog(health, state);
            Some(handle)
        }
        None => None,
    };

    let producer_handle = match spawn_producer(
        source,
        channel.clone(),
        stop.clone(),
        config.capture_backoff(),
    ) {
        Ok(handle) => handle,
        Err(err) => {
            stop.stop();
            if let Some(handle) = watchdog_handle {
                let _ = handle.join();
            }
            return Err(err).context("failed to spawn frame producer");
        }
    };

    info!("SkyShield kernel READY; press Ctrl+C to stop");
    let exit = control.run();

    stop.stop();
    channel.close();
    let capture = match producer_handle.join() {
        Ok(stats) => stats,
        Err(_) => {
            warn!("frame producer thread panicked");
            ProducerStats::default()
        }
    };
    if let Some(handle) = watchdog_handle {
        let _ = handle.join();
    }

    let telemetry = control.snapshot();
    info!(
        frames = telemetry.frames_processed,
        dropped = telemetry.frames_dropped,
        detections = telemetry.detections,
        engagements = telemetry.engagements,
        "Kernel cleanup complete; all subsystems offline"
    );

    Ok(RunOutcome {
        exit,
        telemetry,
        capture,
    })
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use ml_core::{DetectionFault, ThreatDescriptor};
    use video_ingest::{Frame, SyntheticSource};

    use super::*;
    use crate::{effector::SimulatedEffector, pipeline::cycle::KernelFault, status::KernelStatus};

    /// Detector whose first call outlasts the detection deadline.
    struct HangingDetector {
        hang: Duration,
        calls: u32,
    }

    impl DetectionPort for HangingDetector {
        fn analyze(&mut self, _frame: &Frame) -> Result<Option<ThreatDescriptor>, DetectionFault> {
            self.calls += 1;
            if self.calls == 1 {
                thread::sleep(self.hang);
            }
            Ok(None)
        }
    }

    #[test]
    fn stalled_detection_shuts_the_kernel_down() {
        let mut config = KernelConfig {
            detection_deadline_ms: 100,
            ..KernelConfig::default()
        };
        config.source.width = 64;
        config.source.height = 48;
        let source = SyntheticSource::new((64, 48), config.source.synthetic_fps);
        let detector = HangingDetector {
            hang: Duration::from_millis(600),
            calls: 0,
        };
        let effector = SimulatedEffector::new(Duration::ZERO, config.thermal_threshold);

        let outcome = run(config, source, detector, effector).expect("kernel runs");

        match outcome.exit {
            LoopExit::Fault(KernelFault::DetectionStalled { elapsed_ms }) => {
                assert!(elapsed_ms >= 100, "stall reported after {elapsed_ms} ms");
            }
            other => panic!("expected a detection stall, got {other:?}"),
        }
        assert_eq!(outcome.telemetry.system.status, KernelStatus::CriticalFault);
        assert!(!outcome.telemetry.system.is_engagement_active);
        assert_eq!(outcome.telemetry.frames_processed, 0);
        assert!(outcome.capture.captured >= 1);
        assert_eq!(outcome.capture.faults, 0);
    }
}
