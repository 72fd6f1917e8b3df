//! Configuration for the tactical control loop.
//!
//! Settings come from an optional TOML manifest, are overridden by CLI flags,
//! and are validated once into a [`KernelConfig`] that downstream stages use
//! without re-checking.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    interlock::{InterlockSettings, OperatingMode},
    tracker::{PidGains, TrackerSettings},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Canonical configuration shared by every stage of the kernel.
pub struct KernelConfig {
    /// Frames buffered between acquisition and processing.
    pub queue_capacity: usize,
    /// Minimum threat confidence accepted by the interlock.
    pub confidence_floor: f32,
    /// Minimum time between two engagements.
    pub cooldown_seconds: f64,
    /// Emitter temperature above which the effector refuses to pulse.
    pub thermal_threshold: f64,
    /// Tracker deadzone in pixels.
    pub deadzone_pixels: u32,
    /// Bound on each control vector component.
    pub acceleration_limit: f32,
    pub pid_gains: PidGains,
    pub operating_mode: OperatingMode,
    /// Pause between failed capture attempts.
    pub capture_backoff_ms: u64,
    /// Longest tolerated detection call; zero disables the watchdog.
    pub detection_deadline_ms: u64,
    /// Consecutive empty ticks before the tracker state is reset; zero disables.
    pub track_loss_reset_ticks: u32,
    /// Duration of one simulated engagement pulse.
    pub engagement_duration_ms: u64,
    pub source: SourceOptions,
    pub telemetry: TelemetryOptions,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let tracker = TrackerSettings::default();
        let interlock = InterlockSettings::default();
        Self {
            queue_capacity: video_ingest::DEFAULT_QUEUE_CAPACITY,
            confidence_floor: interlock.confidence_floor,
            cooldown_seconds: interlock.cooldown.as_secs_f64(),
            thermal_threshold: 75.0,
            deadzone_pixels: tracker.deadzone_pixels as u32,
            acceleration_limit: tracker.acceleration_limit,
            pid_gains: tracker.gains,
            operating_mode: OperatingMode::Safe,
            capture_backoff_ms: video_ingest::DEFAULT_CAPTURE_BACKOFF.as_millis() as u64,
            detection_deadline_ms: 2_000,
            track_loss_reset_ticks: 30,
            engagement_duration_ms: 3_500,
            source: SourceOptions::default(),
            telemetry: TelemetryOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Frame source selection.
pub struct SourceOptions {
    /// Camera URI or device identifier; absent selects the synthetic source.
    pub uri: Option<String>,
    pub width: i32,
    pub height: i32,
    /// Frame rate of the synthetic source.
    pub synthetic_fps: f64,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            uri: None,
            width: 1280,
            height: 720,
            synthetic_fps: 30.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Optional telemetry knobs for tracing and metrics export.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing control-loop spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
    /// Append every telemetry sample as a JSON line to this file.
    pub sample_log_path: Option<PathBuf>,
}

impl KernelConfig {
    /// Load a TOML manifest. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: KernelConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            bail!("confidence_floor must lie within [0, 1]");
        }
        if Duration::try_from_secs_f64(self.cooldown_seconds).is_err() {
            bail!("cooldown_seconds must be a non-negative number of representable seconds");
        }
        if !self.thermal_threshold.is_finite() || self.thermal_threshold <= 0.0 {
            bail!("thermal_threshold must be positive");
        }
        if !self.acceleration_limit.is_finite() || self.acceleration_limit <= 0.0 {
            bail!("acceleration_limit must be positive");
        }
        let gains = &self.pid_gains;
        if gains
            .kp
            .iter()
            .chain(&gains.ki)
            .chain(&gains.kd)
            .any(|g| !g.is_finite())
        {
            bail!("pid_gains must be finite");
        }
        if self.source.width <= 0 || self.source.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        let fps = self.source.synthetic_fps;
        if self.source.uri.is_none()
            && (!fps.is_finite() || fps <= 0.0 || Duration::try_from_secs_f64(1.0 / fps).is_err())
        {
            bail!("synthetic_fps must be positive");
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            gains: self.pid_gains,
            deadzone_pixels: self.deadzone_pixels as f32,
            acceleration_limit: self.acceleration_limit,
        }
    }

    pub fn interlock_settings(&self) -> InterlockSettings {
        InterlockSettings {
            confidence_floor: self.confidence_floor,
            cooldown: Duration::from_secs_f64(self.cooldown_seconds),
        }
    }

    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }

    pub fn detection_deadline(&self) -> Option<Duration> {
        (self.detection_deadline_ms > 0).then(|| Duration::from_millis(self.detection_deadline_ms))
    }

    pub fn engagement_duration(&self) -> Duration {
        Duration::from_millis(self.engagement_duration_ms)
    }
}

/// CLI arguments accepted by the `run` subcommand. Flags override the manifest.
#[derive(Debug, Default, Args)]
pub struct KernelCliArgs {
    /// TOML manifest with kernel settings.
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,
    /// Camera URI or device identifier; omit for the synthetic source.
    #[arg(long = "source", value_name = "URI")]
    pub source_uri: Option<String>,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX")]
    pub width: Option<i32>,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX")]
    pub height: Option<i32>,
    /// Allow engagement (the default mode is SAFE).
    #[arg(long = "operational", action = clap::ArgAction::SetTrue)]
    pub operational: bool,
    /// Frame channel capacity.
    #[arg(long = "queue-capacity", value_name = "N")]
    pub queue_capacity: Option<usize>,
    /// Interlock confidence floor (0-1).
    #[arg(long = "confidence-floor", value_name = "SCORE")]
    pub confidence_floor: Option<f32>,
    /// Interlock cooldown in seconds.
    #[arg(long = "cooldown", value_name = "SECS")]
    pub cooldown_seconds: Option<f64>,
    /// Detection deadline in milliseconds (0 disables the watchdog).
    #[arg(long = "detection-deadline", value_name = "MS")]
    pub detection_deadline_ms: Option<u64>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr", value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
    /// Append telemetry samples as JSON lines.
    #[arg(long = "sample-log", value_name = "PATH")]
    pub sample_log: Option<PathBuf>,
}

impl TryFrom<KernelCliArgs> for KernelConfig {
    type Error = anyhow::Error;

    fn try_from(args: KernelCliArgs) -> Result<Self> {
        let mut config = match args.config_path.as_deref() {
            Some(path) => KernelConfig::load(path)?,
            None => KernelConfig::default(),
        };

        if let Some(uri) = args.source_uri {
            config.source.uri = Some(uri);
        }
        if let Some(width) = args.width {
            config.source.width = width;
        }
        if let Some(height) = args.height {
            config.source.height = height;
        }
        if args.operational {
            config.operating_mode = OperatingMode::Operational;
        }
        if let Some(capacity) = args.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(floor) = args.confidence_floor {
            config.confidence_floor = floor;
        }
        if let Some(cooldown) = args.cooldown_seconds {
            config.cooldown_seconds = cooldown;
        }
        if let Some(deadline) = args.detection_deadline_ms {
            config.detection_deadline_ms = deadline;
        }
        if args.chrome_trace.is_some() {
            config.telemetry.chrome_trace_path = args.chrome_trace;
        }
        if args.metrics_addr.is_some() {
            config.telemetry.metrics_addr = args.metrics_addr;
        }
        if args.sample_log.is_some() {
            config.telemetry.sample_log_path = args.sample_log;
        }

        config.validate()?;
        Ok(config)
    }
}
