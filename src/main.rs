use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select, tick, unbounded, Sender};
use segstream::capture::{open_source, SourceSpec};
use segstream::config::{EngineConfig, ExecutionProvider, PipelineConfig, RoiConfig};
use segstream::output::{TimingLog, V4L2Output};
use segstream::pipeline::{Pipeline, PipelineEvent};
use segstream::roi::{JsonFileStore, MemoryStore, RegionOfInterestController, RoiStore, ViewRect};
use segstream::segmentation::{self, InferenceEngine, Orientation};
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frame source: camera[:<index>], screen[:<display>] or file:<path>
    #[arg(short, long, default_value = "camera:0")]
    source: SourceSpec,

    /// Path to the recurrent segmentation model (ONNX file)
    #[arg(short, long)]
    model: PathBuf,

    /// Override the source orientation (0, 90, 180 or 270 degrees clockwise)
    #[arg(long, value_parser = parse_orientation)]
    orientation: Option<Orientation>,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// File the region of interest is persisted to (kept in memory if absent)
    #[arg(long)]
    roi_store: Option<PathBuf>,

    /// Show only the segmented crop instead of compositing it onto the frame
    #[arg(long)]
    crop_only: bool,

    /// Width of the virtual view the region of interest is laid out in
    #[arg(long, default_value_t = 1280)]
    view_width: u32,

    /// Height of the virtual view the region of interest is laid out in
    #[arg(long, default_value_t = 720)]
    view_height: u32,

    /// Execution providers in priority order
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = parse_provider,
        default_value = "tensorrt,cuda,cpu"
    )]
    providers: Vec<ExecutionProvider>,

    /// Intra-op threads for the inference runtime
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_orientation(value: &str) -> std::result::Result<Orientation, String> {
    match value {
        "0" => Ok(Orientation::Deg0),
        "90" => Ok(Orientation::Deg90),
        "180" => Ok(Orientation::Deg180),
        "270" => Ok(Orientation::Deg270),
        _ => Err(format!("orientation must be 0, 90, 180 or 270, got '{value}'")),
    }
}

fn parse_provider(value: &str) -> std::result::Result<ExecutionProvider, String> {
    ExecutionProvider::parse(value)
        .ok_or_else(|| format!("unknown execution provider '{value}' (tensorrt, cuda, cpu)"))
}

const COMMAND_HELP: &str = "swap <model>, roi <l> <t> <r> <b>, autocrop, \
    crop-only on|off, show-original on|off, reset-roi, quit";

/// Line commands accepted on stdin while the pipeline runs.
#[derive(Debug, PartialEq)]
enum Command {
    Swap(PathBuf),
    Roi(ViewRect),
    Autocrop,
    CropOnly(bool),
    ShowOriginal(bool),
    ResetRoi,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["swap", path] => Ok(Self::Swap(PathBuf::from(path))),
            ["roi", l, t, r, b] => {
                let parse =
                    |v: &str| v.parse::<f32>().map_err(|_| format!("'{v}' is not a number"));
                Ok(Self::Roi(ViewRect::new(parse(l)?, parse(t)?, parse(r)?, parse(b)?)))
            }
            ["autocrop"] => Ok(Self::Autocrop),
            ["crop-only", "on"] => Ok(Self::CropOnly(true)),
            ["crop-only", "off"] => Ok(Self::CropOnly(false)),
            ["show-original", "on"] => Ok(Self::ShowOriginal(true)),
            ["show-original", "off"] => Ok(Self::ShowOriginal(false)),
            ["reset-roi"] => Ok(Self::ResetRoi),
            ["quit"] | ["exit"] => Ok(Self::Quit),
            _ => Err(format!("unknown command '{line}' ({COMMAND_HELP})")),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("segstream starting");
    tracing::info!("Source: {}", args.source);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("View: {}x{}", args.view_width, args.view_height);

    let store: Box<dyn RoiStore> = match &args.roi_store {
        Some(path) => Box::new(JsonFileStore::new(path)),
        None => Box::new(MemoryStore::new()),
    };
    let roi = Arc::new(RegionOfInterestController::new(RoiConfig::default(), store));
    roi.set_crop_only(args.crop_only);

    let source = open_source(&args.source, args.orientation)
        .with_context(|| format!("Failed to open {}", args.source))?;

    let engine = load_model(&args, args.model.clone())?;

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;
    let show_original = output.show_original_switch();

    let mut pipeline = Pipeline::new(PipelineConfig::default(), roi.clone());
    let events = pipeline.events();
    pipeline
        .start(source, engine, Box::new(TimingLog::new(output)))
        .context("Failed to start pipeline")?;

    let (interrupt_tx, interrupt_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let (command_tx, commands) = unbounded();
    spawn_command_reader(command_tx.clone())?;
    let layout = tick(Duration::from_millis(100));

    tracing::info!("Press Ctrl+C or type 'quit' to stop");

    loop {
        select! {
            recv(layout) -> _ => roi.layout(args.view_width, args.view_height),
            recv(interrupt_rx) -> _ => {
                tracing::info!("Interrupted");
                break;
            }
            recv(events) -> event => match event {
                Ok(PipelineEvent::Stopped) | Err(_) => break,
                Ok(PipelineEvent::Failed(reason)) => tracing::error!("Pipeline failed: {}", reason),
                Ok(event) => tracing::info!("Pipeline event: {:?}", event),
            },
            recv(commands) -> line => {
                let Ok(line) = line else { continue };
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        run_command(&mut pipeline, &roi, &show_original, &args, command)
                    }
                    Err(err) => tracing::warn!("{}", err),
                }
            }
        }
    }

    drop(command_tx);
    pipeline.stop();
    tracing::info!("segstream stopped");
    Ok(())
}

fn load_model(args: &Args, model_path: PathBuf) -> Result<InferenceEngine> {
    tracing::info!("Loading segmentation model from {}", model_path.display());
    let mut config = EngineConfig::new(model_path);
    config.intra_threads = args.threads;
    config.execution_providers = args.providers.clone();
    let engine = segmentation::load_engine(&config).context("Failed to load segmentation model")?;
    tracing::info!("Segmentation model loaded successfully");
    Ok(engine)
}

fn run_command(
    pipeline: &mut Pipeline,
    roi: &RegionOfInterestController,
    show_original: &AtomicBool,
    args: &Args,
    command: Command,
) {
    match command {
        Command::Swap(path) => {
            let swapped =
                load_model(args, path).and_then(|engine| Ok(pipeline.swap_model(engine)?));
            if let Err(err) = swapped {
                tracing::error!("Model swap failed: {:#}", err);
            }
        }
        Command::Roi(rect) => {
            if !roi.set_rect(rect) {
                tracing::warn!("ROI {:?} rejected (layout not settled)", rect);
            }
        }
        Command::Autocrop => match pipeline.latest_frame() {
            Some(frame) if roi.initialize_from_frame(&frame) => {}
            Some(_) => tracing::warn!("No contour found for the ROI"),
            None => tracing::warn!("No frame captured yet"),
        },
        Command::CropOnly(enabled) => {
            roi.set_crop_only(enabled);
            tracing::info!("Crop-only display {}", if enabled { "on" } else { "off" });
        }
        Command::ShowOriginal(enabled) => {
            show_original.store(enabled, Ordering::Relaxed);
            tracing::info!("Original frame display {}", if enabled { "on" } else { "off" });
        }
        Command::ResetRoi => {
            roi.reset();
            tracing::info!("ROI reset");
        }
        Command::Quit => {}
    }
}

/// Forward stdin lines to `commands`; the sender is also held by `main`, so
/// a closed stdin never disconnects the channel.
fn spawn_command_reader(commands: Sender<String>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if commands.send(line.to_string()).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_commands() {
        assert_eq!("swap /m/b.onnx".parse(), Ok(Command::Swap(PathBuf::from("/m/b.onnx"))));
        assert_eq!(
            "roi 10 20 110 220".parse(),
            Ok(Command::Roi(ViewRect::new(10.0, 20.0, 110.0, 220.0)))
        );
        assert_eq!("crop-only on".parse(), Ok(Command::CropOnly(true)));
        assert_eq!("show-original on".parse(), Ok(Command::ShowOriginal(true)));
        assert_eq!("show-original off".parse(), Ok(Command::ShowOriginal(false)));
        assert!("show-original".parse::<Command>().is_err());
        assert_eq!("  quit ".parse(), Ok(Command::Quit));
        assert!("roi 1 2 3".parse::<Command>().is_err());
        assert!("roi a b c d".parse::<Command>().is_err());
        assert!("crop-only maybe".parse::<Command>().is_err());
    }

    #[test]
    fn parses_cli_flags() {
        let args = Args::try_parse_from([
            "segstream",
            "--model",
            "rvm.onnx",
            "--source",
            "file:clip.mp4",
            "--orientation",
            "90",
            "--providers",
            "cuda,cpu",
        ])
        .unwrap();
        assert_eq!(args.source, SourceSpec::File(PathBuf::from("clip.mp4")));
        assert_eq!(args.orientation, Some(Orientation::Deg90));
        assert_eq!(args.providers, vec![ExecutionProvider::Cuda, ExecutionProvider::Cpu]);

        let bad = ["segstream", "--model", "m.onnx", "--orientation", "45"];
        assert!(Args::try_parse_from(bad).is_err());
    }
}
