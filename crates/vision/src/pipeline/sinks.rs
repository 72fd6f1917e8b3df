//! Push-based telemetry sinks. Sink failures never reach the control loop.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{pipeline::aggregator::TelemetrySample, status::SystemStatus};

/// Frames between two heartbeat log lines.
pub const HEARTBEAT_INTERVAL: u64 = 30;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

pub trait TelemetrySink: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, sample: &TelemetrySample, status: &SystemStatus)
    -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Periodic heartbeat through `tracing`.
pub struct LogSink {
    every: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(HEARTBEAT_INTERVAL)
    }
}

impl TelemetrySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(
        &mut self,
        sample: &TelemetrySample,
        status: &SystemStatus,
    ) -> Result<(), SinkError> {
        if sample.frame % self.every == 0 {
            debug!(
                "Control heartbeat: frame #{}, {:.1} fps, status={}, locked={}, effector={}",
                sample.frame,
                sample.smoothed_fps,
                status.status,
                status.is_target_locked,
                if status.is_engagement_active {
                    "DEPLOYED"
                } else {
                    "HOLD_FIRE"
                }
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SampleRecord<'a> {
    #[serde(flatten)]
    sample: &'a TelemetrySample,
    system: &'a SystemStatus,
}

/// Writes one JSON object per tick.
pub struct JsonLinesSink<W: Write + Send> {
    writer: BufWriter<W>,
}

impl JsonLinesSink<File> {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|err| SinkError::Io(err.into_error()))
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    fn publish(
        &mut self,
        sample: &TelemetrySample,
        status: &SystemStatus,
    ) -> Result<(), SinkError> {
        serde_json::to_writer(
            &mut self.writer,
            &SampleRecord {
                sample,
                system: status,
            },
        )?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
