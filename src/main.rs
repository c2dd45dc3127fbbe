//! gige-grab: drive one camera component through a full capture run.
//!
//! Loads a TOML configuration, runs `init → start → grab×N → stop → finish` and reports
//! every frame. Stands in for the host runtime when bringing up a camera.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use gige_capture::validation::{validate_color_bars, validate_frame_sequence, validate_gradient};
use gige_capture::{
    trigger_channel, CameraConfig, ChannelSink, DeviceLibrary, GigeCamera, GrabOutcome,
    SharedLibrary, Variant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Pattern {
    Bars,
    Gradient,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Grab frames from a GigE camera component")]
struct Args {
    /// TOML configuration file.
    config: Option<PathBuf>,

    /// Camera address, overrides `device.address`.
    #[arg(long)]
    address: Option<String>,

    /// Number of grab cycles to run.
    #[arg(long, default_value_t = 10)]
    frames: usize,

    /// Use the in-memory camera instead of real hardware.
    #[cfg(feature = "mock")]
    #[arg(long)]
    mock: bool,

    /// Write the last published frame to this PNG file.
    #[arg(long)]
    save_last: Option<PathBuf>,

    /// Check the last frame for a test pattern.
    #[arg(long, value_enum)]
    validate: Option<Pattern>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => CameraConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CameraConfig::default(),
    };
    if let Some(address) = &args.address {
        config.address.clone_from(address);
    }

    #[cfg(feature = "mock")]
    {
        use gige_capture::mock::{MockCamera, MockLibrary, TestPattern};

        if args.mock {
            if config.address.is_empty() {
                "mock-0".clone_into(&mut config.address);
            }
            let pattern = match args.validate {
                Some(Pattern::Gradient) => TestPattern::Gradient,
                _ => TestPattern::ColorBars,
            };
            let mock = MockLibrary::new();
            mock.add_camera(&config.address, MockCamera::new().with_pattern(pattern));
            return run(&SharedLibrary::new(mock), config, &args);
        }
    }

    #[cfg(feature = "v4l2")]
    {
        run(
            &SharedLibrary::new(gige_capture::v4l2::V4l2Library::new()),
            config,
            &args,
        )
    }

    #[cfg(not(feature = "v4l2"))]
    {
        let _ = config;
        bail!("no camera backend compiled in; rebuild with the `v4l2` feature or pass --mock")
    }
}

fn run<L: DeviceLibrary>(library: &SharedLibrary<L>, config: CameraConfig, args: &Args) -> Result<()> {
    let (sink, frames) = ChannelSink::bounded(args.frames.max(1));
    let (trigger, trigger_input) = trigger_channel();
    let triggered = config.variant == Variant::Triggered;

    let mut camera = GigeCamera::new(library, config)
        .with_output(sink)
        .with_trigger_input(trigger_input);

    camera.init().context("camera init failed")?;
    camera.start().context("camera start failed")?;

    let mut published = 0_usize;
    for _ in 0..args.frames {
        if triggered {
            trigger.fire();
            camera.poll_trigger();
        }
        match camera.grab() {
            GrabOutcome::Published { slot, frame_count } => {
                published += 1;
                tracing::info!(slot, frame_count, "frame");
            }
            GrabOutcome::Dropped(reason) => tracing::warn!(%reason, "frame dropped"),
            GrabOutcome::Gated => tracing::debug!("grab gated"),
            GrabOutcome::NotCapturing => break,
        }
    }

    let checked = match camera.last_frame() {
        Some(frame) => {
            tracing::info!(
                width = frame.width(),
                height = frame.height(),
                format = %frame.format(),
                "last frame"
            );
            if let Some(path) = &args.save_last {
                frame
                    .to_dynamic()
                    .save(path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), "frame saved");
            }
            match args.validate {
                Some(Pattern::Bars) => validate_color_bars(&frame).map_err(anyhow::Error::from),
                Some(Pattern::Gradient) => validate_gradient(&frame).map_err(anyhow::Error::from),
                None => Ok(()),
            }
        }
        None => Ok(()),
    };

    camera.stop().context("camera stop failed")?;
    camera.finish().context("camera finish failed")?;
    checked.context("pattern check failed")?;

    let received: Vec<_> = frames.try_iter().collect();
    tracing::info!(published, received = received.len(), "capture finished");
    if args.validate.is_some() {
        validate_frame_sequence(&received).context("frame sequence check failed")?;
    }
    if published == 0 {
        bail!("no frame was published");
    }
    Ok(())
}
