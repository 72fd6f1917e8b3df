//! Structured kernel events.
//!
//! Decision code reports what happened as a [`KernelEvent`]; how it is
//! surfaced (logs, alarms, an operator console) is up to the [`EventSink`].

use std::time::Duration;

use tracing::{error, info, warn};

use crate::{
    effector::HardwareFault,
    interlock::{DenialReason, OperatingMode},
    status::KernelStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum KernelEvent {
    LoopStarted { mode: OperatingMode },
    TargetAcquired { frame: u64, class_id: i64, score: f32 },
    TargetLost { frame: u64 },
    TrackerReset { missed_ticks: u32 },
    EngagementDenied { frame: u64, reason: DenialReason },
    Engaged { frame: u64, confidence: f32 },
    HardwareFault { frame: u64, fault: HardwareFault },
    DetectionFault { frame: u64, error: String },
    DetectionStalled { elapsed: Duration },
    KernelFault { error: String },
    Shutdown { status: KernelStatus },
}

pub trait EventSink: Send {
    fn emit(&mut self, event: &KernelEvent);
}

/// Default sink forwarding events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&mut self, event: &KernelEvent) {
        match event {
            KernelEvent::LoopStarted { mode } => {
                info!(%mode, "tactical control loop running");
            }
            KernelEvent::TargetAcquired {
                frame,
                class_id,
                score,
            } => info!(frame, class_id, score, "target acquired"),
            KernelEvent::TargetLost { frame } => info!(frame, "target lost"),
            KernelEvent::TrackerReset { missed_ticks } => {
                info!(missed_ticks, "tracker reset after sustained loss of target")
            }
            KernelEvent::EngagementDenied { frame, reason } => match reason {
                DenialReason::SafeMode => {
                    info!(frame, reason = reason.label(), "engagement blocked: {reason}")
                }
                DenialReason::LowConfidence { .. } | DenialReason::Cooldown { .. } => {
                    warn!(frame, reason = reason.label(), "engagement inhibited: {reason}")
                }
            },
            KernelEvent::Engaged { frame, confidence } => {
                warn!(frame, confidence, "countermeasure engaged")
            }
            KernelEvent::HardwareFault { frame, fault } => {
                error!(frame, "effector hardware failure: {fault}")
            }
            KernelEvent::DetectionFault { frame, error } => {
                warn!(frame, "detection fault, skipping frame: {error}")
            }
            KernelEvent::DetectionStalled { elapsed } => {
                error!(elapsed_ms = elapsed.as_millis() as u64, "detection call stalled")
            }
            KernelEvent::KernelFault { error } => error!("kernel fault: {error}"),
            KernelEvent::Shutdown { status } => info!(%status, "control loop stopped"),
        }
    }
}

/// Sink that keeps every event, for tests and post-run inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<KernelEvent>>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<KernelEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&mut self, event: &KernelEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}
