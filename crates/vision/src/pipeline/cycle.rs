//! The orchestration cycle: the single consumer of the frame channel.
//!
//! Each tick drains one frame, runs detection, feeds the kinematic tracker,
//! consults the interlock when the target is locked, and emits telemetry. The
//! cycle owns tracker, interlock and status state outright and is the only
//! writer of [`SystemStatus`].

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use ml_core::{DetectionPort, ThreatDescriptor};
use thiserror::Error;
use tracing::debug;
use video_ingest::{Frame, FrameChannel, StopSignal};

use crate::{
    effector::Effector,
    events::{EventSink, KernelEvent, TracingEventSink},
    interlock::{Authorization, Interlock, OperatingMode},
    pipeline::{
        aggregator::{TelemetryAggregator, TelemetryBoard, TelemetrySample, TelemetrySnapshot},
        config::KernelConfig,
        sinks::TelemetrySink,
        watchdog::{DetectionHealth, WatchdogState},
    },
    status::{KernelStatus, SystemStatus},
    tracker::{ControlVector, KinematicTracker},
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelFault {
    #[error("control loop panicked: {0}")]
    Panic(String),
    #[error("detection call stalled for {elapsed_ms} ms")]
    DetectionStalled { elapsed_ms: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// The frame channel closed during a normal shutdown.
    Graceful,
    Fault(KernelFault),
}

pub struct ControlLoop<D, E: Effector> {
    detector: D,
    tracker: KinematicTracker,
    interlock: Interlock<E>,
    aggregator: TelemetryAggregator,
    sinks: Vec<Box<dyn TelemetrySink>>,
    events: Box<dyn EventSink>,
    status: SystemStatus,
    mode: OperatingMode,
    track_loss_reset_ticks: u32,
    channel: Arc<FrameChannel>,
    stop: Arc<StopSignal>,
    health: Arc<DetectionHealth>,
    watchdog: Option<Arc<WatchdogState>>,
    last_frame_at: Option<Instant>,
    has_target: bool,
}

impl<D, E> ControlLoop<D, E>
where
    D: DetectionPort,
    E: Effector,
{
    pub fn new(
        config: &KernelConfig,
        detector: D,
        effector: E,
        channel: Arc<FrameChannel>,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            detector,
            tracker: KinematicTracker::new(config.tracker_settings()),
            interlock: Interlock::new(config.interlock_settings(), effector),
            aggregator: TelemetryAggregator::new(),
            sinks: Vec::new(),
            events: Box::new(TracingEventSink),
            status: SystemStatus::default(),
            mode: config.operating_mode,
            track_loss_reset_ticks: config.track_loss_reset_ticks,
            channel,
            stop,
            health: Arc::new(DetectionHealth::new()),
            watchdog: None,
            last_frame_at: None,
            has_target: false,
        }
    }

    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    /// Share the detection mark with a watchdog and react to its trips.
    pub fn with_watchdog(mut self, health: Arc<DetectionHealth>, state: Arc<WatchdogState>) -> Self {
        self.health = health;
        self.watchdog = Some(state);
        self
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn operating_mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn set_operating_mode(&mut self, mode: OperatingMode) {
        self.mode = mode;
    }

    pub fn telemetry_board(&self) -> TelemetryBoard {
        self.aggregator.board()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.aggregator.snapshot()
    }

    pub fn interlock(&self) -> &Interlock<E> {
        &self.interlock
    }

    pub fn tracker(&self) -> &KinematicTracker {
        &self.tracker
    }

    /// Consume frames until the channel closes or a kernel fault occurs.
    pub fn run(&mut self) -> LoopExit {
        self.status.status = KernelStatus::Ready;
        self.aggregator.record_status(self.status);
        self.events.emit(&KernelEvent::LoopStarted { mode: self.mode });

        while let Some(frame) = self.channel.pop() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(frame)));
            let fault = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err(fault)) => fault,
                Err(payload) => KernelFault::Panic(panic_message(payload.as_ref())),
            };
            self.fault_shutdown(&fault);
            return LoopExit::Fault(fault);
        }

        if let Some(fault) = self.stall_fault() {
            self.fault_shutdown(&fault);
            return LoopExit::Fault(fault);
        }

        self.shutdown();
        LoopExit::Graceful
    }

    /// Process a single frame.
    pub fn tick(&mut self, frame: Frame) -> Result<TelemetrySample, KernelFault> {
        let span = tracing::info_span!(
            "tick",
            frame = frame.sequence,
            locked = tracing::field::Empty,
            engaged = tracing::field::Empty
        );
        let _guard = span.enter();
        let tick_start = Instant::now();

        let (instant_fps, smoothed_fps) = match self.last_frame_at.replace(tick_start) {
            Some(previous) => self
                .aggregator
                .record_interval(tick_start.duration_since(previous)),
            None => (0.0, 0.0),
        };

        self.health.begin();
        let detection = self.detector.analyze(&frame);
        self.health.end();

        if let Some(fault) = self.stall_fault() {
            return Err(fault);
        }

        let threat = match detection {
            Ok(threat) => threat,
            Err(err) => {
                metrics::counter!("skyshield_detection_faults_total").increment(1);
                self.events.emit(&KernelEvent::DetectionFault {
                    frame: frame.sequence,
                    error: err.to_string(),
                });
                None
            }
        };

        let control = match threat.as_ref() {
            Some(threat) => Some(self.engage_threat(&frame, threat, tick_start)),
            None => {
                self.lose_target(&frame, tick_start);
                None
            }
        };

        span.record("locked", self.status.is_target_locked);
        span.record("engaged", self.status.is_engagement_active);

        let sample = TelemetrySample {
            timestamp_ms: Utc::now().timestamp_millis(),
            frame: frame.sequence,
            instant_fps,
            smoothed_fps,
            frame_age_ms: frame.captured_at.elapsed().as_secs_f32() * 1000.0,
            status: self.status.status,
            is_target_locked: self.status.is_target_locked,
            is_engagement_active: self.status.is_engagement_active,
            control,
            threat,
        };

        self.publish(&sample);
        self.aggregator
            .record(sample.clone(), self.status, self.channel.evicted());

        metrics::gauge!("skyshield_pipeline_fps").set(smoothed_fps as f64);
        metrics::gauge!("skyshield_queue_depth").set(self.channel.len() as f64);
        metrics::counter!("skyshield_frames_dropped_total").absolute(self.channel.evicted());
        metrics::histogram!("skyshield_tick_seconds").record(tick_start.elapsed().as_secs_f64());

        Ok(sample)
    }

    fn engage_threat(
        &mut self,
        frame: &Frame,
        threat: &ThreatDescriptor,
        now: Instant,
    ) -> ControlVector {
        if !self.has_target {
            self.has_target = true;
            self.events.emit(&KernelEvent::TargetAcquired {
                frame: frame.sequence,
                class_id: threat.class_id,
                score: threat.score,
            });
        }

        let control = self.tracker.compute_at(threat.centroid, frame.center(), now);
        self.status.is_target_locked = control.locked;

        if !control.locked {
            self.status.is_engagement_active = false;
            return control;
        }

        let authorization = self.interlock.authorize(threat.score, self.mode);
        self.status.is_engagement_active = authorization.is_engaged();

        match authorization {
            Authorization::Engaged => {
                metrics::counter!("skyshield_engagements_total").increment(1);
                self.events.emit(&KernelEvent::Engaged {
                    frame: frame.sequence,
                    confidence: threat.score,
                });
            }
            Authorization::Denied(reason) => {
                metrics::counter!("skyshield_engagement_denials_total", "reason" => reason.label())
                    .increment(1);
                self.events.emit(&KernelEvent::EngagementDenied {
                    frame: frame.sequence,
                    reason,
                });
            }
            Authorization::Faulted(fault) => {
                metrics::counter!("skyshield_hardware_faults_total").increment(1);
                self.events.emit(&KernelEvent::HardwareFault {
                    frame: frame.sequence,
                    fault,
                });
            }
        }

        control
    }

    fn lose_target(&mut self, frame: &Frame, now: Instant) {
        if self.has_target {
            self.has_target = false;
            self.events
                .emit(&KernelEvent::TargetLost { frame: frame.sequence });
        }
        self.status.clear_target();
        if self.tracker.note_miss(now, self.track_loss_reset_ticks) {
            self.events.emit(&KernelEvent::TrackerReset {
                missed_ticks: self.tracker.state().missed_ticks,
            });
        }
    }

    fn publish(&mut self, sample: &TelemetrySample) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.publish(sample, &self.status) {
                metrics::counter!("skyshield_sink_errors_total", "sink" => sink.name())
                    .increment(1);
                debug!(sink = sink.name(), "telemetry sink failed: {err}");
            }
        }
    }

    fn stall_fault(&mut self) -> Option<KernelFault> {
        let state = self.watchdog.as_ref()?;
        if !state.is_triggered() {
            return None;
        }
        let elapsed = state.stalled_for().unwrap_or_default();
        self.events
            .emit(&KernelEvent::DetectionStalled { elapsed });
        Some(KernelFault::DetectionStalled {
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    fn shutdown(&mut self) {
        self.interlock.release();
        self.status.clear_target();
        self.flush_sinks();
        self.aggregator.record_status(self.status);
        self.events.emit(&KernelEvent::Shutdown {
            status: self.status.status,
        });
    }

    fn fault_shutdown(&mut self, fault: &KernelFault) {
        self.events.emit(&KernelEvent::KernelFault {
            error: fault.to_string(),
        });
        self.stop.stop();
        self.channel.close();
        self.status.status = KernelStatus::CriticalFault;
        self.shutdown();
    }

    fn flush_sinks(&mut self) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush() {
                debug!(sink = sink.name(), "telemetry sink flush failed: {err}");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
