// THEORY:
// `inspection_rig` is the operator-facing binary. It wires a frame source, the
// configured classification strategy and the event log into the library's
// single-threaded inspection loop, and prints the operator overlay to the
// terminal instead of drawing it on a window.
//
// Key architectural principles:
// 1. **Configuration first:** the TOML file is loaded and validated before any
//    device or network resource is opened. A bad ROI never reaches the camera.
// 2. **Adapters at the edge:** disk replay, the OpenCV camera and the HTTP
//    detector all live in this crate. The library only sees its own traits.
// 3. **Quiet terminal:** status text is printed only when it changes, so a
//    steady stream of identical verdicts does not flood the console.

mod detector;
mod operator;
mod sources;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use pack_inspector::{
    BaselineStore, Classification, Classifier, DetectorClassifier, Diagnostic, DifferenceClassifier, FrameSource,
    InspectionPipeline, InspectorConfig, StrategyConfig, TickReport, local_now, run,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::detector::{DEFAULT_API_URL, HttpDetector};
use crate::sources::DirectorySource;

#[derive(Parser, Debug)]
#[command(name = "inspection_rig", version, about = "ROI-gated packaging defect inspection")]
struct Args {
    /// Path to the rig configuration file.
    #[arg(long, default_value = "inspector.toml")]
    config: PathBuf,

    /// Overrides `log_path` from the configuration.
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Replay still images from this directory instead of a camera.
    #[arg(long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Start over at the first image when the directory is exhausted.
    #[arg(long = "loop")]
    looping: bool,

    /// Playback rate for `--frames`; 0 runs as fast as possible.
    #[arg(long, default_value_t = 0.0)]
    fps: f64,

    /// Camera device index.
    #[cfg(feature = "camera")]
    #[arg(long, value_name = "INDEX")]
    camera: Option<i32>,

    /// Inference service base URL for the detector strategy.
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Model identifier for the detector strategy, e.g. `packaging-defects/3`.
    #[arg(long)]
    model_id: Option<String>,

    #[arg(long, env = "INSPECTOR_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value_t = 5)]
    detector_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = InspectorConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(log_path) = args.log_path.clone() {
        config.log_path = log_path;
    }

    let classifier = build_classifier(&config, &args)?;
    info!(strategy = classifier.name(), log = %config.log_path.display(), "classifier ready");
    let mut pipeline = InspectionPipeline::new(&config, classifier)?;
    let mut source = open_source(&args, &config)?;
    let mut commands = operator::spawn_stdin_commands();

    println!("{}", pack_inspector::core_modules::state::IDLE_PROMPT);
    let mut last_line = String::new();
    let summary = run(source.as_mut(), &mut pipeline, &mut commands, local_now, |report| {
        let line = overlay_line(report);
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
        if let Some(entry) = &report.logged {
            info!(%entry, "event logged");
        }
        for err in &report.errors {
            warn!(%err, "tick error");
        }
    });

    info!(
        processed = summary.frames_processed,
        dropped = summary.frames_dropped,
        logged = summary.events_logged,
        errors = summary.errors,
        stopped_by_operator = summary.stopped_by_operator,
        "rig stopped"
    );
    Ok(())
}

fn build_classifier(config: &InspectorConfig, args: &Args) -> anyhow::Result<Box<dyn Classifier>> {
    match &config.strategy {
        StrategyConfig::Difference { threshold, .. } => {
            let baseline = BaselineStore::new(&config.baseline_path).load().unwrap_or_else(|err| {
                warn!(%err, "ignoring unreadable baseline, press S to capture a new one");
                None
            });
            Ok(Box::new(DifferenceClassifier::new(
                *threshold,
                config.presence_threshold(),
                baseline,
            )))
        }
        StrategyConfig::Detector {
            confidence_cutoff,
            input,
        } => {
            let model_id = args
                .model_id
                .as_deref()
                .context("--model-id is required for the detector strategy")?;
            if args.api_key.is_empty() {
                warn!("no API key given, set INSPECTOR_API_KEY or --api-key");
            }
            let detector = HttpDetector::new(
                &args.api_url,
                model_id,
                args.api_key.clone(),
                Duration::from_secs(args.detector_timeout_secs),
            )?;
            Ok(Box::new(DetectorClassifier::new(detector, *confidence_cutoff, *input)))
        }
    }
}

#[cfg_attr(not(feature = "camera"), allow(unused_variables))]
fn open_source(args: &Args, config: &InspectorConfig) -> anyhow::Result<Box<dyn FrameSource>> {
    #[cfg(feature = "camera")]
    {
        if let Some(index) = args.camera {
            if args.frames.is_some() {
                bail!("--frames and --camera are mutually exclusive");
            }
            let camera = sources::CameraSource::open(index, config.frame_width, config.frame_height)?;
            return Ok(Box::new(camera));
        }
    }

    match &args.frames {
        Some(dir) => Ok(Box::new(DirectorySource::open(dir, args.looping)?.with_fps(args.fps))),
        None => bail!("no frame source given, pass --frames <DIR>{}", camera_hint()),
    }
}

fn camera_hint() -> &'static str {
    if cfg!(feature = "camera") { " or --camera <INDEX>" } else { "" }
}

/// One line of operator overlay for this tick.
fn overlay_line(report: &TickReport) -> String {
    match &report.classification {
        Some(classification) => format!("{} | {}", describe(classification), report.status),
        None => report.status.clone(),
    }
}

fn describe(classification: &Classification) -> String {
    let verdict = classification.log_label();
    match &classification.diagnostic {
        Diagnostic::Difference { mean_diff, match_score } => match match_score {
            Some(score) => format!("{verdict} (meanDiff {mean_diff:.1}, match {score:.2})"),
            None => format!("{verdict} (meanDiff {mean_diff:.1})"),
        },
        Diagnostic::Presence { match_score } => format!("{verdict} (match {match_score:.2})"),
        Diagnostic::Detections(_) | Diagnostic::None => match classification.confidence {
            Some(confidence) => format!("{verdict} {confidence:.2}"),
            None => verdict.to_string(),
        },
    }
}
