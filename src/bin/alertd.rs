//! alertd - spoken walking alerts from a live camera
//!
//! This daemon:
//! 1. Loads configuration (ALERTS_CONFIG file, ALERTS_* overrides, flags)
//! 2. Probes for a camera that delivers lit frames
//! 3. Runs the text (sign reading) or object (obstacle) pipeline
//! 4. Speaks alerts through a background dispatcher
//! 5. Stops cleanly on Ctrl-C or after --max-frames

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use walkbuddy_alerts::pipeline::{DiagnosticKind, STOPPED_MESSAGE};
use walkbuddy_alerts::ui::{Ui, UiMode};
use walkbuddy_alerts::{
    AlertError, AlertsConfig, CaptureConfig, DetectionEvent, DeviceProbe, FrameStage,
    NoveltyFilter, NotificationDispatcher, ObjectDetector, ObjectStage, Observation,
    PersistenceVoter, PipelineMode, PipelineRunner, RecognizedText, RunnerState, Scripted,
    SyntheticDriver, SystemDriver, TextRecognizer, TextStage,
};

#[derive(Parser, Debug)]
#[command(name = "alertd", about = "Speak sign text and obstacle alerts from a camera feed")]
struct Args {
    /// Pipeline to run (text|objects); overrides the config file
    #[arg(long, value_name = "MODE")]
    mode: Option<PipelineMode>,

    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, value_name = "PATH", env = "ALERTS_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many processed frames
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// Use a synthetic camera instead of hardware
    #[arg(long)]
    synthetic: bool,

    /// JSON script of per-frame model outputs for the selected pipeline
    #[arg(long, value_name = "PATH")]
    script: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AlertsConfig::load_from(path)?,
        None => AlertsConfig::load()?,
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.synthetic {
        config.capture.candidates = CaptureConfig::synthetic(&[0]).candidates;
    }

    let ui = Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );
    let probe = DeviceProbe::new(
        SystemDriver::new(SyntheticDriver::default()),
        config.capture.clone(),
        config.probe.clone(),
    );

    let mut dispatcher = NotificationDispatcher::spawn(config.speech.build(), config.queue_capacity)?;
    log::info!(
        "alertd running. mode={}, queue_capacity={}",
        config.mode,
        config.queue_capacity
    );

    let outcome = match config.mode {
        PipelineMode::Text => {
            let recognizer: Box<dyn TextRecognizer> = match &args.script {
                Some(path) => Box::new(Scripted::<RecognizedText>::from_json_file(path)?),
                None => {
                    log::warn!("no text recognizer configured; frames will yield no text");
                    Box::new(Scripted::<RecognizedText>::new(Vec::new()))
                }
            };
            let stage = TextStage::new(
                recognizer,
                config.text.gate.clone(),
                NoveltyFilter::new(config.text.history_capacity),
            );
            let runner = PipelineRunner::new(probe, stage, dispatcher.notifier())
                .with_probe_observer(ui.probe_reporter());
            run(runner, args.max_frames)
        }
        PipelineMode::Objects => {
            let detector: Box<dyn ObjectDetector> = match &args.script {
                Some(path) => Box::new(Scripted::<DetectionEvent>::from_json_file(path)?),
                None => {
                    log::warn!("no object detector configured; frames will yield no detections");
                    Box::new(Scripted::<DetectionEvent>::new(Vec::new()))
                }
            };
            let voter =
                PersistenceVoter::new(config.objects.rules.clone(), config.objects.voter.clone())?;
            let stage =
                ObjectStage::new(detector, voter).with_detector_floor(config.objects.detector_floor);
            let runner = PipelineRunner::new(probe, stage, dispatcher.notifier())
                .with_probe_observer(ui.probe_reporter());
            run(runner, args.max_frames)
        }
    };

    dispatcher.close();
    let stats = dispatcher.stats();
    log::info!(
        "speech: accepted={} spoken={} failed={} dropped={} discarded={}",
        stats.accepted,
        stats.spoken,
        stats.failed,
        stats.dropped,
        stats.discarded
    );

    let summary = outcome?;
    println!(
        "alertd: {} frames, {} read failures, {} detector failures",
        summary.frames, summary.read_failures, summary.detector_failures
    );
    Ok(())
}

#[derive(Debug, Default)]
struct RunSummary {
    frames: u64,
    read_failures: u64,
    detector_failures: u64,
}

fn run<S: FrameStage>(mut runner: PipelineRunner<S>, max_frames: Option<u64>) -> Result<RunSummary> {
    let control = runner.control();
    let signal = control.clone();
    ctrlc::set_handler(move || {
        signal.stop();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut summary = RunSummary::default();
    for observation in runner.start() {
        match observation {
            Observation::Frame(report) => {
                summary.frames += 1;
                for text in &report.notifications {
                    println!("alert: {}", text);
                }
                if max_frames.is_some_and(|max| summary.frames >= max) {
                    control.stop();
                }
            }
            Observation::Diagnostic(report) => match report.kind {
                DiagnosticKind::DeviceUnavailable => log::error!("{}", report.message),
                DiagnosticKind::ReadFailure => summary.read_failures += 1,
                DiagnosticKind::DetectorFailure => summary.detector_failures += 1,
            },
            Observation::Stopped { history } => {
                println!("{}", STOPPED_MESSAGE);
                if !history.is_empty() {
                    println!("history:\n{}", history);
                }
            }
        }
    }

    if let Some(source) = runner.source() {
        let stats = source.stats();
        log::info!(
            "capture: device={} frames={} read_failures={}",
            stats.device,
            stats.frames_captured,
            stats.read_failures
        );
    }

    if runner.state() == RunnerState::Error {
        return Err(match runner.last_error() {
            Some(err) => anyhow!("{}", err),
            None => anyhow!("{}", AlertError::DeviceUnavailable { attempts: 0 }),
        });
    }
    Ok(summary)
}
