//! PID kinematic tracker converting a target centroid into a bounded
//! dual-axis control vector for the pan/tilt gimbal.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Smallest time step used by the controller, in seconds.
pub const MIN_DT_SECS: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Per-axis PID gains, indexed `[x, y]`.
pub struct PidGains {
    pub kp: [f32; 2],
    pub ki: [f32; 2],
    pub kd: [f32; 2],
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: [0.15, 0.15],
            ki: [0.02, 0.02],
            kd: [0.08, 0.08],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerSettings {
    pub gains: PidGains,
    /// Error magnitude (pixels) below which the integral term is frozen.
    pub deadzone_pixels: f32,
    /// Symmetric bound applied to each output component.
    pub acceleration_limit: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            gains: PidGains::default(),
            deadzone_pixels: 12.0,
            acceleration_limit: 85.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
/// Controller output for one tick.
pub struct ControlVector {
    pub x: f32,
    pub y: f32,
    pub locked: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct TrackerState {
    pub integral: [f32; 2],
    pub previous_error: [f32; 2],
    pub last_sync: Instant,
    /// Consecutive ticks without a detection.
    pub missed_ticks: u32,
}

impl TrackerState {
    fn new(now: Instant) -> Self {
        Self {
            integral: [0.0; 2],
            previous_error: [0.0; 2],
            last_sync: now,
            missed_ticks: 0,
        }
    }
}

pub struct KinematicTracker {
    settings: TrackerSettings,
    state: TrackerState,
}

impl KinematicTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self::starting_at(settings, Instant::now())
    }

    /// Create a tracker whose first `dt` is measured from `now`.
    pub fn starting_at(settings: TrackerSettings, now: Instant) -> Self {
        Self {
            settings,
            state: TrackerState::new(now),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Compute the control vector steering `frame_center` onto `target`.
    pub fn compute(&mut self, target: (f32, f32), frame_center: (f32, f32)) -> ControlVector {
        self.compute_at(target, frame_center, Instant::now())
    }

    pub fn compute_at(
        &mut self,
        target: (f32, f32),
        frame_center: (f32, f32),
        now: Instant,
    ) -> ControlVector {
        let TrackerSettings {
            gains,
            deadzone_pixels,
            acceleration_limit,
        } = self.settings;

        let dt = now
            .saturating_duration_since(self.state.last_sync)
            .as_secs_f32()
            .max(MIN_DT_SECS);

        let error = [target.0 - frame_center.0, target.1 - frame_center.1];

        // Anti-windup: freeze the integral while already inside the deadzone.
        if error[0].hypot(error[1]) > deadzone_pixels {
            for axis in 0..2 {
                self.state.integral[axis] += error[axis] * dt;
            }
        }

        let mut output = [0.0f32; 2];
        for axis in 0..2 {
            let derivative = (error[axis] - self.state.previous_error[axis]) / dt;
            let raw = gains.kp[axis] * error[axis]
                + gains.ki[axis] * self.state.integral[axis]
                + gains.kd[axis] * derivative;
            output[axis] = clamp_signal(raw, acceleration_limit);
        }

        let lock_radius = deadzone_pixels * 2.0;
        let locked = error.iter().all(|e| e.abs() <= lock_radius);

        self.state.previous_error = error;
        self.state.last_sync = now;
        self.state.missed_ticks = 0;

        ControlVector {
            x: output[0],
            y: output[1],
            locked,
        }
    }

    /// Record a tick without a target. Resets the controller once `reset_after`
    /// consecutive misses accumulate (zero disables the reset) and returns
    /// whether a reset happened on this call.
    pub fn note_miss(&mut self, now: Instant, reset_after: u32) -> bool {
        self.state.missed_ticks = self.state.missed_ticks.saturating_add(1);
        if reset_after > 0 && self.state.missed_ticks == reset_after {
            let missed = self.state.missed_ticks;
            self.reset(now);
            self.state.missed_ticks = missed;
            return true;
        }
        false
    }

    pub fn reset(&mut self, now: Instant) {
        self.state = TrackerState::new(now);
    }
}

fn clamp_signal(value: f32, limit: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-limit, limit)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    const CENTER: (f32, f32) = (640.0, 360.0);

    fn tracker(now: Instant) -> KinematicTracker {
        KinematicTracker::starting_at(TrackerSettings::default(), now)
    }

    #[test]
    fn integral_frozen_inside_deadzone() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        for step in 1..=20 {
            tracker.compute_at((648.0, 365.0), CENTER, t0 + Duration::from_millis(33 * step));
        }
        assert_eq!(tracker.state().integral, [0.0, 0.0]);
    }

    #[test]
    fn integral_grows_monotonically_outside_deadzone() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        let mut last = 0.0f32;
        for step in 1..=20 {
            tracker.compute_at((740.0, 360.0), CENTER, t0 + Duration::from_millis(33 * step));
            let integral = tracker.state().integral[0];
            assert!(integral > last, "integral did not grow at step {step}");
            last = integral;
        }
        assert_eq!(tracker.state().integral[1], 0.0);
    }

    #[test]
    fn lock_requires_both_axes_within_twice_deadzone() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        let dt = Duration::from_millis(33);

        let near = tracker.compute_at((664.0, 384.0), CENTER, t0 + dt);
        assert!(near.locked);

        let off_axis = tracker.compute_at((664.0, 385.0), CENTER, t0 + dt * 2);
        assert!(!off_axis.locked);

        let far = tracker.compute_at((900.0, 360.0), CENTER, t0 + dt * 3);
        assert!(!far.locked);
    }

    #[test]
    fn output_saturates_at_acceleration_limit() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        let out = tracker.compute_at((5_000.0, -5_000.0), CENTER, t0 + Duration::from_millis(33));
        assert_eq!(out.x, 85.0);
        assert_eq!(out.y, -85.0);
    }

    #[test]
    fn proportional_term_dominates_steady_error() {
        let t0 = Instant::now();
        let settings = TrackerSettings {
            gains: PidGains {
                kp: [0.5, 0.5],
                ki: [0.0, 0.0],
                kd: [0.0, 0.0],
            },
            ..TrackerSettings::default()
        };
        let mut tracker = KinematicTracker::starting_at(settings, t0);
        let out = tracker.compute_at((680.0, 340.0), CENTER, t0 + Duration::from_millis(50));
        assert!((out.x - 20.0).abs() < 1e-4);
        assert!((out.y + 10.0).abs() < 1e-4);
    }

    #[test]
    fn zero_dt_is_clamped() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        let out = tracker.compute_at((700.0, 360.0), CENTER, t0);
        assert!(out.x.is_finite());
        assert!(out.x <= 85.0);
    }

    #[test]
    fn sustained_loss_resets_state() {
        let t0 = Instant::now();
        let mut tracker = tracker(t0);
        tracker.compute_at((800.0, 200.0), CENTER, t0 + Duration::from_millis(33));
        assert_ne!(tracker.state().integral, [0.0, 0.0]);

        let later = t0 + Duration::from_secs(1);
        assert!(!tracker.note_miss(later, 3));
        assert!(!tracker.note_miss(later, 3));
        assert!(tracker.note_miss(later, 3));
        assert_eq!(tracker.state().integral, [0.0, 0.0]);
        assert_eq!(tracker.state().previous_error, [0.0, 0.0]);
        assert_eq!(tracker.state().last_sync, later);

        assert!(!tracker.note_miss(later, 3));
        tracker.compute_at((650.0, 360.0), CENTER, later + Duration::from_millis(33));
        assert_eq!(tracker.state().missed_ticks, 0);
    }

    proptest! {
        #[test]
        fn control_vector_stays_within_limit(
            targets in prop::collection::vec((-4000.0f32..4000.0, -4000.0f32..4000.0), 1..64),
            step_us in 0u64..200_000,
            limit in 1.0f32..200.0,
        ) {
            let t0 = Instant::now();
            let settings = TrackerSettings { acceleration_limit: limit, ..TrackerSettings::default() };
            let mut tracker = KinematicTracker::starting_at(settings, t0);
            for (i, target) in targets.iter().enumerate() {
                let now = t0 + Duration::from_micros(step_us * (i as u64 + 1));
                let out = tracker.compute_at(*target, CENTER, now);
                prop_assert!(out.x.abs() <= limit);
                prop_assert!(out.y.abs() <= limit);
            }
        }
    }
}
