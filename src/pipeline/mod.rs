//! Frame loop orchestration.
//!
//! `PipelineRunner` owns the capture side (probe and opened source) and one
//! `FrameStage`. `start()` returns a `Session`, a pull-based iterator that
//! performs one loop iteration per `next()` and yields what the host should
//! show. The host thread drives the session; any thread can stop it or ask
//! for a history reset through a cloned `PipelineControl`.
//!
//! ```text
//! Idle --start--> Opening --probe ok--> Running --stop--> Stopping --> Idle
//!                    |
//!                    +--probe failed--> Error --start--> Opening ...
//! ```

mod fps;
mod stage;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::capture::{CaptureSource, DeviceProbe, NoopProbeObserver, ProbeObserver};
use crate::dispatch::{NotificationRequest, Notifier};
use crate::error::AlertError;
use crate::frame::Frame;

pub use fps::FpsMeter;
pub use stage::{FrameStage, ObjectStage, StageOutput, TextStage, DEFAULT_DETECTOR_FLOOR};

/// Message shown in place of video when no device could be opened.
pub const DEVICE_UNAVAILABLE_MESSAGE: &str = "Camera failed to open";
/// Message shown for a frame that could not be read.
pub const READ_FAILURE_MESSAGE: &str = "Warning: failed to read frame; stream lost.";
pub const STOPPED_MESSAGE: &str = "Stopped.";

// ----------------------------------------------------------------------------
// Control and state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Opening,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Idle => "idle",
            RunnerState::Opening => "opening",
            RunnerState::Running => "running",
            RunnerState::Stopping => "stopping",
            RunnerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Cross-thread run and reset flags for one runner.
#[derive(Clone, Debug, Default)]
pub struct PipelineControl {
    running: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
}

impl PipelineControl {
    /// Ask the session to end. Takes effect at the next iteration boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ask the frame thread to clear the stage history before its next frame.
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn arm(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunnerSettings {
    /// Pause after a failed frame read.
    pub read_failure_backoff: Duration,
    /// Pause after every processed frame.
    pub frame_pause: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            read_failure_backoff: Duration::from_millis(50),
            frame_pause: Duration::from_millis(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Observations
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    DeviceUnavailable,
    ReadFailure,
    DetectorFailure,
}

#[derive(Clone, Debug)]
pub struct DiagnosticReport {
    pub kind: DiagnosticKind,
    /// Generated error frame, or the raw frame the detector failed on.
    pub frame: Frame,
    pub history: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct FrameReport {
    /// Annotated frame.
    pub frame: Frame,
    pub history: String,
    pub debug_line: String,
    /// Announcements produced by this frame, whether or not the queue took them.
    pub notifications: Vec<String>,
    /// Announcements the dispatcher rejected.
    pub dropped: usize,
}

/// One iteration's worth of output.
#[derive(Clone, Debug)]
pub enum Observation {
    Frame(FrameReport),
    Diagnostic(DiagnosticReport),
    Stopped { history: String },
}

impl Observation {
    pub fn history(&self) -> &str {
        match self {
            Observation::Frame(report) => &report.history,
            Observation::Diagnostic(report) => &report.history,
            Observation::Stopped { history } => history,
        }
    }

    /// Status text for the host's debug area.
    pub fn status(&self) -> &str {
        match self {
            Observation::Frame(report) => &report.debug_line,
            Observation::Diagnostic(report) => &report.message,
            Observation::Stopped { .. } => STOPPED_MESSAGE,
        }
    }
}

/// `Res: WxH | Brightness: b | Boxes: n | Conf≥c | FPS≈f`
pub fn debug_line(frame: &Frame, boxes: usize, confidence_floor: f32, fps: f32) -> String {
    format!(
        "Res: {}x{} | Brightness: {:.1} | Boxes: {} | Conf≥{:.2} | FPS≈{:.1}",
        frame.width,
        frame.height,
        frame.mean_brightness(),
        boxes,
        confidence_floor,
        fps
    )
}

// ----------------------------------------------------------------------------
// Runner
// ----------------------------------------------------------------------------

pub struct PipelineRunner<S> {
    probe: DeviceProbe,
    source: Option<CaptureSource>,
    stage: S,
    notifier: Notifier,
    control: PipelineControl,
    settings: RunnerSettings,
    state: RunnerState,
    fps: FpsMeter,
    observer: Box<dyn ProbeObserver + Send>,
    last_error: Option<AlertError>,
}

impl<S: FrameStage> PipelineRunner<S> {
    pub fn new(probe: DeviceProbe, stage: S, notifier: Notifier) -> Self {
        Self {
            probe,
            source: None,
            stage,
            notifier,
            control: PipelineControl::default(),
            settings: RunnerSettings::default(),
            state: RunnerState::Idle,
            fps: FpsMeter::new(),
            observer: Box::new(NoopProbeObserver),
            last_error: None,
        }
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Report probe progress (attempts, accepted device) to `observer`.
    pub fn with_probe_observer<O: ProbeObserver + Send + 'static>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Handle for stopping or resetting from another thread.
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Why the last session ended in `Error`.
    pub fn last_error(&self) -> Option<&AlertError> {
        self.last_error.as_ref()
    }

    pub fn source(&self) -> Option<&CaptureSource> {
        self.source.as_ref()
    }

    /// Clear the stage history now.
    pub fn reset(&mut self) {
        self.stage.reset();
    }

    /// Begin a session. Re-arms the run flag; an already open device is reused.
    pub fn start(&mut self) -> Session<'_, S> {
        if !matches!(self.state, RunnerState::Idle | RunnerState::Error) {
            log::warn!("PipelineRunner: start() while {}, restarting", self.state);
        }
        self.control.arm();
        self.state = RunnerState::Opening;
        Session {
            runner: self,
            finished: false,
        }
    }

    fn open_source(&mut self) -> Result<(), AlertError> {
        if let Some(source) = &self.source {
            log::info!("PipelineRunner: reusing {}", source.describe());
            return Ok(());
        }
        let handle = self.probe.open_with(self.observer.as_mut())?;
        log::info!("PipelineRunner: opened {}", handle.describe());
        self.source = Some(CaptureSource::new(handle));
        Ok(())
    }

    fn step(&mut self) -> Option<Observation> {
        match self.state {
            RunnerState::Opening => {
                if let Err(err) = self.open_source() {
                    log::error!("PipelineRunner: {}", err);
                    self.last_error = Some(err);
                    self.state = RunnerState::Error;
                    return Some(Observation::Diagnostic(DiagnosticReport {
                        kind: DiagnosticKind::DeviceUnavailable,
                        frame: Frame::diagnostic(),
                        history: self.stage.history(),
                        message: DEVICE_UNAVAILABLE_MESSAGE.to_string(),
                    }));
                }
                self.last_error = None;
                self.fps.restart();
                self.state = RunnerState::Running;
                log::info!("PipelineRunner: {} session running", self.stage.name());
            }
            RunnerState::Running => {}
            _ => return None,
        }

        if self.control.take_reset() {
            log::info!("PipelineRunner: history cleared");
            self.stage.reset();
        }

        if !self.control.is_running() {
            self.state = RunnerState::Stopping;
            let history = self.stage.history();
            self.state = RunnerState::Idle;
            log::info!("PipelineRunner: session stopped");
            return Some(Observation::Stopped { history });
        }

        let source = self.source.as_mut()?;
        let mut frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("PipelineRunner: {}", err);
                thread::sleep(self.settings.read_failure_backoff);
                return Some(Observation::Diagnostic(DiagnosticReport {
                    kind: DiagnosticKind::ReadFailure,
                    frame: Frame::diagnostic(),
                    history: self.stage.history(),
                    message: READ_FAILURE_MESSAGE.to_string(),
                }));
            }
        };

        let output = match self.stage.process(&mut frame) {
            Ok(output) => output,
            Err(err) => {
                log::warn!("PipelineRunner: {} stage failed: {:#}", self.stage.name(), err);
                return Some(Observation::Diagnostic(DiagnosticReport {
                    kind: DiagnosticKind::DetectorFailure,
                    frame,
                    history: self.stage.history(),
                    message: format!("Detector failed: {:#}", err),
                }));
            }
        };

        let mut dropped = 0;
        for text in &output.notifications {
            if let Err(err) = self.notifier.enqueue(NotificationRequest::new(text.clone())) {
                log::debug!("PipelineRunner: notification not queued: {}", err);
                dropped += 1;
            }
        }

        let fps = self.fps.tick();
        let line = debug_line(&frame, output.boxes, self.stage.confidence_floor(), fps);
        log::debug!("{}", line);
        let report = FrameReport {
            frame,
            history: self.stage.history(),
            debug_line: line,
            notifications: output.notifications,
            dropped,
        };
        if !self.settings.frame_pause.is_zero() {
            thread::sleep(self.settings.frame_pause);
        }
        Some(Observation::Frame(report))
    }
}

/// Pull-based frame loop. Ends after `Stopped` or a device-open failure.
///
/// Dropping an unfinished session leaves the runner idle with its device open.
pub struct Session<'a, S: FrameStage> {
    runner: &'a mut PipelineRunner<S>,
    finished: bool,
}

impl<S: FrameStage> Session<'_, S> {
    pub fn control(&self) -> PipelineControl {
        self.runner.control()
    }
}

impl<S: FrameStage> Iterator for Session<'_, S> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        if self.finished {
            return None;
        }
        let observation = self.runner.step();
        match &observation {
            None | Some(Observation::Stopped { .. }) => self.finished = true,
            Some(Observation::Diagnostic(report))
                if report.kind == DiagnosticKind::DeviceUnavailable =>
            {
                self.finished = true
            }
            _ => {}
        }
        observation
    }
}

impl<S: FrameStage> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if matches!(
            self.runner.state,
            RunnerState::Opening | RunnerState::Running | RunnerState::Stopping
        ) {
            self.runner.state = RunnerState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, ProbeSettings, Resolution, SyntheticDevice, SyntheticDriver};
    use crate::detect::{RecognizedText, Scripted};
    use crate::dispatch::NotificationDispatcher;
    use crate::frame::{BoundingBox, Rgb};
    use crate::novelty::{NoveltyFilter, TextGate};
    use crate::speech::LogSpeech;

    fn probe(devices: Vec<SyntheticDevice>) -> DeviceProbe {
        let indices: Vec<u32> = devices.iter().map(|d| d.index).collect();
        let config = CaptureConfig {
            resolutions: vec![Resolution::new(64, 48)],
            ..CaptureConfig::synthetic(&indices)
        };
        DeviceProbe::new(
            SyntheticDriver::new(devices),
            config,
            ProbeSettings::default().without_delays(),
        )
    }

    fn quiet() -> RunnerSettings {
        RunnerSettings {
            read_failure_backoff: Duration::ZERO,
            frame_pause: Duration::ZERO,
        }
    }

    fn exit_sign() -> Scripted<RecognizedText> {
        let region = BoundingBox::new(4.0, 4.0, 40.0, 20.0);
        Scripted::new(vec![vec![RecognizedText::new(region, "Exit", 0.9)]]).repeating()
    }

    #[test]
    fn debug_line_format() {
        let frame = Frame::solid(640, 480, Rgb(10, 10, 10));
        assert_eq!(
            debug_line(&frame, 3, 0.5, 12.34),
            "Res: 640x480 | Brightness: 10.0 | Boxes: 3 | Conf≥0.50 | FPS≈12.3"
        );
    }

    #[test]
    fn unavailable_device_ends_session_in_error() -> anyhow::Result<()> {
        let dispatcher = NotificationDispatcher::spawn(LogSpeech, 4)?;
        let stage = TextStage::new(exit_sign(), TextGate::default(), NoveltyFilter::default());
        let dark = SyntheticDevice::new(0).with_brightness(0);
        let mut runner = PipelineRunner::new(probe(vec![dark]), stage, dispatcher.notifier())
            .with_settings(quiet());

        let observations: Vec<Observation> = runner.start().collect();
        assert_eq!(observations.len(), 1);
        match &observations[0] {
            Observation::Diagnostic(report) => {
                assert_eq!(report.kind, DiagnosticKind::DeviceUnavailable);
                assert_eq!(report.frame.width, 640);
                assert_eq!(report.message, DEVICE_UNAVAILABLE_MESSAGE);
            }
            other => panic!("unexpected observation: {:?}", other.status()),
        }
        assert_eq!(runner.state(), RunnerState::Error);
        assert!(matches!(
            runner.last_error(),
            Some(AlertError::DeviceUnavailable { attempts: 3 })
        ));
        Ok(())
    }

    #[test]
    fn stop_is_observed_at_iteration_boundary() -> anyhow::Result<()> {
        let dispatcher = NotificationDispatcher::spawn(LogSpeech, 4)?;
        let stage = TextStage::new(exit_sign(), TextGate::default(), NoveltyFilter::default());
        let mut runner = PipelineRunner::new(
            probe(vec![SyntheticDevice::new(0)]),
            stage,
            dispatcher.notifier(),
        )
        .with_settings(quiet());

        let mut session = runner.start();
        let first = session.next().expect("frame");
        assert!(matches!(first, Observation::Frame(_)));
        session.control().stop();
        match session.next() {
            Some(Observation::Stopped { history }) => assert_eq!(history, "Exit"),
            other => panic!("expected Stopped, got {:?}", other.map(|o| o.status().to_string())),
        }
        assert!(session.next().is_none());
        drop(session);
        assert_eq!(runner.state(), RunnerState::Idle);
        assert!(runner.source().is_some());
        Ok(())
    }

    #[test]
    fn requested_reset_is_applied_before_next_frame() -> anyhow::Result<()> {
        let dispatcher = NotificationDispatcher::spawn(LogSpeech, 4)?;
        let stage = TextStage::new(exit_sign(), TextGate::default(), NoveltyFilter::default());
        let mut runner = PipelineRunner::new(
            probe(vec![SyntheticDevice::new(0)]),
            stage,
            dispatcher.notifier(),
        )
        .with_settings(quiet());
        let control = runner.control();

        let mut session = runner.start();
        let Some(Observation::Frame(first)) = session.next() else {
            panic!("expected a frame");
        };
        assert_eq!(first.notifications, vec!["Exit"]);

        let Some(Observation::Frame(second)) = session.next() else {
            panic!("expected a frame");
        };
        assert!(second.notifications.is_empty());

        control.request_reset();
        let Some(Observation::Frame(third)) = session.next() else {
            panic!("expected a frame");
        };
        assert_eq!(third.notifications, vec!["Exit"]);
        Ok(())
    }

    #[test]
    fn read_failures_keep_the_loop_running() -> anyhow::Result<()> {
        let dispatcher = NotificationDispatcher::spawn(LogSpeech, 4)?;
        let stage = TextStage::new(exit_sign(), TextGate::default(), NoveltyFilter::default());
        let flaky = SyntheticDevice::new(0).with_failure_every(3);
        let mut runner = PipelineRunner::new(probe(vec![flaky]), stage, dispatcher.notifier())
            .with_settings(quiet());

        let kinds: Vec<Option<DiagnosticKind>> = runner
            .start()
            .take(12)
            .map(|obs| match obs {
                Observation::Diagnostic(report) => Some(report.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds.len(), 12);
        assert!(kinds.contains(&Some(DiagnosticKind::ReadFailure)));
        assert!(kinds.contains(&None));
        assert_eq!(runner.state(), RunnerState::Idle);
        Ok(())
    }
}
