//! Safety interlock gating effector engagement.
//!
//! Every authorization request passes three gates in fixed order: operating
//! mode, detection confidence, then cooldown. The first gate that fails decides
//! the denial reason. Only a request clearing all three arms the effector, and
//! the machine is disarmed again before `authorize` returns.

use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::effector::{Effector, HardwareFault};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    /// Hardware interlock engaged; engagement is never authorized.
    #[default]
    Safe,
    Operational,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Safe => f.write_str("SAFE"),
            OperatingMode::Operational => f.write_str("OPERATIONAL"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterlockPhase {
    Idle,
    Cooldown,
    ArmedReady,
}

/// Why an authorization request was refused. Denials are expected outcomes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DenialReason {
    SafeMode,
    LowConfidence { confidence: f32, floor: f32 },
    Cooldown { remaining: Duration },
}

impl DenialReason {
    /// Stable label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            DenialReason::SafeMode => "safe_mode",
            DenialReason::LowConfidence { .. } => "low_confidence",
            DenialReason::Cooldown { .. } => "cooldown",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::SafeMode => f.write_str("hardware interlock engaged (SAFE mode)"),
            DenialReason::LowConfidence { confidence, floor } => write!(
                f,
                "threat confidence {confidence:.2} below floor {floor:.2}"
            ),
            DenialReason::Cooldown { remaining } => {
                write!(f, "cooldown active for another {:.1}s", remaining.as_secs_f64())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Engaged,
    Denied(DenialReason),
    /// All gates passed but the effector failed during engagement.
    Faulted(HardwareFault),
}

impl Authorization {
    pub fn is_engaged(&self) -> bool {
        matches!(self, Authorization::Engaged)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterlockSettings {
    pub confidence_floor: f32,
    pub cooldown: Duration,
}

impl Default for InterlockSettings {
    fn default() -> Self {
        Self {
            confidence_floor: 0.92,
            cooldown: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterlockState {
    pub operating_mode: OperatingMode,
    pub last_activation: Option<Instant>,
    pub is_armed: bool,
}

pub struct Interlock<E> {
    settings: InterlockSettings,
    state: InterlockState,
    phase: InterlockPhase,
    effector: E,
}

impl<E: Effector> Interlock<E> {
    pub fn new(settings: InterlockSettings, effector: E) -> Self {
        Self {
            settings,
            state: InterlockState {
                operating_mode: OperatingMode::Safe,
                last_activation: None,
                is_armed: false,
            },
            phase: InterlockPhase::Idle,
            effector,
        }
    }

    pub fn state(&self) -> &InterlockState {
        &self.state
    }

    pub fn phase(&self) -> InterlockPhase {
        self.phase
    }

    pub fn effector(&self) -> &E {
        &self.effector
    }

    pub fn authorize(&mut self, confidence: f32, mode: OperatingMode) -> Authorization {
        self.authorize_at(confidence, mode, Instant::now())
    }

    /// Evaluate the gates as of `now` and engage if all of them pass.
    pub fn authorize_at(
        &mut self,
        confidence: f32,
        mode: OperatingMode,
        now: Instant,
    ) -> Authorization {
        self.state.operating_mode = mode;

        if mode == OperatingMode::Safe {
            self.state.is_armed = false;
            self.phase = InterlockPhase::Idle;
            return Authorization::Denied(DenialReason::SafeMode);
        }

        if confidence < self.settings.confidence_floor {
            self.refresh_phase(now);
            return Authorization::Denied(DenialReason::LowConfidence {
                confidence,
                floor: self.settings.confidence_floor,
            });
        }

        if let Some(remaining) = self.cooldown_remaining(now) {
            self.phase = InterlockPhase::Cooldown;
            return Authorization::Denied(DenialReason::Cooldown { remaining });
        }

        self.state.is_armed = true;
        self.phase = InterlockPhase::ArmedReady;

        let pulse_started = Instant::now();
        let result = self.effector.fire();
        self.state.is_armed = false;

        match result {
            Ok(()) => {
                // Cooldown runs from the end of the pulse.
                let finished = now + pulse_started.elapsed();
                self.state.last_activation = Some(finished);
                self.phase = InterlockPhase::Cooldown;
                Authorization::Engaged
            }
            Err(fault) => {
                self.refresh_phase(now + pulse_started.elapsed());
                Authorization::Faulted(fault)
            }
        }
    }

    /// Disarm unconditionally. Used on the fault and shutdown paths.
    pub fn force_idle(&mut self) {
        self.state.is_armed = false;
        self.phase = InterlockPhase::Idle;
    }

    pub fn release(&mut self) {
        self.force_idle();
        self.effector.release();
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.state.last_activation?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.settings.cooldown).then(|| self.settings.cooldown - elapsed)
    }

    fn refresh_phase(&mut self, now: Instant) {
        self.phase = if self.cooldown_remaining(now).is_some() {
            InterlockPhase::Cooldown
        } else {
            InterlockPhase::Idle
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingEffector {
        fired: u32,
        fail: bool,
        released: bool,
        pulse: Duration,
    }

    impl Effector for CountingEffector {
        fn fire(&mut self) -> Result<(), HardwareFault> {
            if self.fail {
                return Err(HardwareFault::Unavailable("gpio write failed".into()));
            }
            if !self.pulse.is_zero() {
                std::thread::sleep(self.pulse);
            }
            self.fired += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    fn interlock() -> Interlock<CountingEffector> {
        Interlock::new(InterlockSettings::default(), CountingEffector::default())
    }

    #[test]
    fn safe_mode_always_denies() {
        let mut lock = interlock();
        let t0 = Instant::now();
        let outcome = lock.authorize_at(0.99, OperatingMode::Safe, t0 + Duration::from_secs(100));
        assert_eq!(outcome, Authorization::Denied(DenialReason::SafeMode));
        assert_eq!(lock.phase(), InterlockPhase::Idle);
        assert_eq!(lock.effector().fired, 0);
    }

    #[test]
    fn confidence_just_below_floor_denies() {
        let mut lock = interlock();
        let outcome = lock.authorize_at(0.91, OperatingMode::Operational, Instant::now());
        assert!(matches!(
            outcome,
            Authorization::Denied(DenialReason::LowConfidence { .. })
        ));
        assert_eq!(lock.effector().fired, 0);
    }

    #[test]
    fn cooldown_blocks_until_window_expires() {
        let mut lock = interlock();
        let t0 = Instant::now();

        assert!(lock.authorize_at(0.95, OperatingMode::Operational, t0).is_engaged());
        assert_eq!(lock.phase(), InterlockPhase::Cooldown);
        assert!(lock.state().last_activation.is_some_and(|at| at >= t0));

        let early = lock.authorize_at(0.95, OperatingMode::Operational, t0 + Duration::from_secs(10));
        match early {
            Authorization::Denied(DenialReason::Cooldown { remaining }) => {
                assert!(remaining >= Duration::from_secs(5));
                assert!(remaining < Duration::from_secs(6));
            }
            other => panic!("expected cooldown denial, got {other:?}"),
        }
        assert_eq!(lock.phase(), InterlockPhase::Cooldown);

        let later = lock.authorize_at(0.95, OperatingMode::Operational, t0 + Duration::from_secs(16));
        assert!(later.is_engaged());
        assert_eq!(lock.effector().fired, 2);
    }

    #[test]
    fn gates_evaluate_in_order() {
        let mut lock = interlock();
        let t0 = Instant::now();
        lock.authorize_at(0.95, OperatingMode::Operational, t0);

        // Low confidence is reported ahead of the active cooldown.
        let outcome = lock.authorize_at(0.5, OperatingMode::Operational, t0 + Duration::from_secs(1));
        assert!(matches!(
            outcome,
            Authorization::Denied(DenialReason::LowConfidence { .. })
        ));

        // SAFE is reported ahead of everything else.
        let outcome = lock.authorize_at(0.5, OperatingMode::Safe, t0 + Duration::from_secs(1));
        assert_eq!(outcome, Authorization::Denied(DenialReason::SafeMode));
    }

    #[test]
    fn hardware_fault_is_reported_and_leaves_machine_disarmed() {
        let mut lock = Interlock::new(
            InterlockSettings::default(),
            CountingEffector {
                fail: true,
                ..CountingEffector::default()
            },
        );
        let outcome = lock.authorize_at(0.97, OperatingMode::Operational, Instant::now());
        assert!(matches!(outcome, Authorization::Faulted(_)));
        assert!(!lock.state().is_armed);
        assert_eq!(lock.state().last_activation, None);
        assert_eq!(lock.phase(), InterlockPhase::Idle);
    }

    #[test]
    fn cooldown_starts_when_pulse_ends() {
        let pulse = Duration::from_millis(300);
        let mut lock = Interlock::new(
            InterlockSettings {
                cooldown: Duration::from_millis(400),
                ..InterlockSettings::default()
            },
            CountingEffector {
                pulse,
                ..CountingEffector::default()
            },
        );

        let before = Instant::now();
        assert!(lock.authorize(0.95, OperatingMode::Operational).is_engaged());
        assert!(
            lock.state()
                .last_activation
                .is_some_and(|at| at >= before + pulse)
        );

        std::thread::sleep(Duration::from_millis(150));
        let outcome = lock.authorize(0.95, OperatingMode::Operational);
        assert!(matches!(
            outcome,
            Authorization::Denied(DenialReason::Cooldown { .. })
        ));
        assert_eq!(lock.effector().fired, 1);
    }

    #[test]
    fn release_forces_idle_and_releases_effector() {
        let mut lock = interlock();
        lock.authorize_at(0.95, OperatingMode::Operational, Instant::now());
        lock.release();
        assert_eq!(lock.phase(), InterlockPhase::Idle);
        assert!(!lock.state().is_armed);
        assert!(lock.effector().released);
    }
}
