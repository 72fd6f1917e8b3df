//! Effector hardware port and a simulated countermeasure emitter.

use std::{
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareFault {
    #[error("emitter temperature {temperature:.1} would exceed threshold {threshold:.1}")]
    Overheat { temperature: f64, threshold: f64 },
    #[error("effector output unavailable: {0}")]
    Unavailable(String),
}

/// Physically consequential output driven only after the interlock authorizes it.
pub trait Effector: Send {
    /// Run one bounded-duration engagement pulse.
    fn fire(&mut self) -> Result<(), HardwareFault>;

    /// Drive outputs to their safe level and release the hardware handle.
    fn release(&mut self) {}
}

impl<E: Effector + ?Sized> Effector for Box<E> {
    fn fire(&mut self) -> Result<(), HardwareFault> {
        (**self).fire()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// First-order heat model of the emitter: each pulse adds heat, which then
/// decays linearly towards ambient.
#[derive(Clone, Debug)]
pub struct ThermalModel {
    pub ambient: f64,
    pub heat_per_pulse: f64,
    pub cooling_per_sec: f64,
    pub threshold: f64,
    temperature: f64,
    updated_at: Instant,
}

impl ThermalModel {
    pub fn new(threshold: f64) -> Self {
        Self {
            ambient: 25.0,
            heat_per_pulse: 20.0,
            cooling_per_sec: 1.5,
            threshold,
            temperature: 25.0,
            updated_at: Instant::now(),
        }
    }

    pub fn temperature_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.updated_at).as_secs_f64();
        (self.temperature - elapsed * self.cooling_per_sec).max(self.ambient)
    }

    /// Add one pulse worth of heat, refusing if the result crosses the threshold.
    pub fn try_pulse(&mut self, now: Instant) -> Result<f64, HardwareFault> {
        let projected = self.temperature_at(now) + self.heat_per_pulse;
        if projected > self.threshold {
            return Err(HardwareFault::Overheat {
                temperature: projected,
                threshold: self.threshold,
            });
        }
        self.temperature = projected;
        self.updated_at = now;
        Ok(projected)
    }
}

/// Stand-in emitter for bench runs: holds the output for the engagement
/// duration and tracks emitter heat.
pub struct SimulatedEffector {
    engagement: Duration,
    thermal: ThermalModel,
    pulses: u64,
    released: bool,
}

impl SimulatedEffector {
    pub fn new(engagement: Duration, thermal_threshold: f64) -> Self {
        Self {
            engagement,
            thermal: ThermalModel::new(thermal_threshold),
            pulses: 0,
            released: false,
        }
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    pub fn thermal(&self) -> &ThermalModel {
        &self.thermal
    }
}

impl Effector for SimulatedEffector {
    fn fire(&mut self) -> Result<(), HardwareFault> {
        if self.released {
            return Err(HardwareFault::Unavailable("effector released".into()));
        }
        let temperature = self.thermal.try_pulse(Instant::now())?;
        debug!(temperature, duration = ?self.engagement, "emitter pulse");
        if !self.engagement.is_zero() {
            thread::sleep(self.engagement);
        }
        self.pulses += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_to_back_pulses_overheat() {
        let mut effector = SimulatedEffector::new(Duration::ZERO, 75.0);
        assert!(effector.fire().is_ok());
        assert!(effector.fire().is_ok());
        let err = effector.fire().expect_err("third pulse should overheat");
        assert!(matches!(err, HardwareFault::Overheat { .. }));
        assert_eq!(effector.pulses(), 2);
    }

    #[test]
    fn emitter_cools_towards_ambient() {
        let mut model = ThermalModel::new(75.0);
        let t0 = Instant::now();
        model.try_pulse(t0).expect("first pulse");
        let later = model.temperature_at(t0 + Duration::from_secs(5));
        assert!((later - 37.5).abs() < 1e-9);
        let cold = model.temperature_at(t0 + Duration::from_secs(60));
        assert_eq!(cold, model.ambient);
    }

    #[test]
    fn released_effector_refuses_to_fire() {
        let mut effector = SimulatedEffector::new(Duration::ZERO, 75.0);
        effector.release();
        assert!(matches!(effector.fire(), Err(HardwareFault::Unavailable(_))));
    }
}
