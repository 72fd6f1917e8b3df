use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ml_core::CandidateFilter;
use video_ingest::{FfmpegSource, FrameSource, SyntheticSource};
use vision::{KernelCliArgs, KernelConfig, LoopExit, SimulatedEffector};

use crate::demo::OrbitingTarget;

#[derive(Debug, Parser)]
#[command(name = "skyshield", version, about = "SkyShield tactical control kernel")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control kernel with the scripted demo detector.
    Run(KernelCliArgs),
    /// Print the resolved configuration as TOML.
    Config(KernelCliArgs),
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run_kernel(KernelConfig::try_from(args)?),
        Command::Config(args) => {
            let config = KernelConfig::try_from(args)?;
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn run_kernel(config: KernelConfig) -> Result<()> {
    let size = (config.source.width, config.source.height);
    let source: Box<dyn FrameSource> = match config.source.uri.as_deref() {
        Some(uri) => Box::new(FfmpegSource::new(uri, size)),
        None => Box::new(SyntheticSource::new(size, config.source.synthetic_fps)),
    };
    let detector = OrbitingTarget::new(CandidateFilter::default());
    let effector =
        SimulatedEffector::new(config.engagement_duration(), config.thermal_threshold);

    let outcome = vision::run(config, source, detector, effector)?;
    let stats = &outcome.telemetry;
    println!(
        "frames={} dropped={} detections={} engagements={} uptime={:.1}s capture_faults={}",
        stats.frames_processed,
        stats.frames_dropped,
        stats.detections,
        stats.engagements,
        stats.uptime_secs,
        outcome.capture.faults
    );

    match outcome.exit {
        LoopExit::Graceful => Ok(()),
        LoopExit::Fault(fault) => Err(fault).context("kernel stopped on a critical fault"),
    }
}
