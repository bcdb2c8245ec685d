//! WalkBuddy alerts
//!
//! Turns a live camera feed into short spoken alerts for a walking user:
//! signs are read aloud once per session, and obstacles are announced once
//! they have persisted across several frames.
//!
//! # Architecture
//!
//! Both pipelines share one shape:
//!
//! 1. **Acquire**: `DeviceProbe` finds a camera configuration that delivers lit
//!    frames; `CaptureSource` reads one frame per call.
//! 2. **Perceive**: an external `TextRecognizer` or `ObjectDetector` model.
//! 3. **Decide**: `NoveltyFilter` (each phrase once) or `PersistenceVoter`
//!    (N-of-M majority per class, with cooldown).
//! 4. **Speak**: `NotificationDispatcher` queues announcements for a single
//!    speech worker so the frame loop never waits on synthesis.
//!
//! `PipelineRunner` ties the stages together and exposes the loop as an
//! iterator of `Observation`s for the host to display.
//!
//! # Module Structure
//!
//! - `capture`: device search space, probing, capture backends
//! - `detect`: model contracts and the scripted stand-in
//! - `novelty` / `voter`: the two decision strategies
//! - `dispatch` / `speech`: notification queue and speech engines
//! - `pipeline`: runner, session, stages
//! - `config`: file and environment configuration

pub mod capture;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod novelty;
pub mod pipeline;
pub mod speech;
pub mod ui;
pub mod voter;

pub use capture::{
    BackendHint, CaptureConfig, CaptureHandle, CaptureSource, DeviceCandidate, DeviceProbe,
    FormatHint, ProbeSettings, Resolution, SyntheticDevice, SyntheticDriver, SystemDriver,
};
pub use config::{AlertsConfig, PipelineMode};
pub use detect::{DetectionEvent, ObjectDetector, RecognizedText, Scripted, TextRecognizer};
pub use dispatch::{DispatchStats, NotificationDispatcher, NotificationRequest, Notifier};
pub use error::AlertError;
pub use frame::{BoundingBox, Frame, Rgb};
pub use novelty::{NoveltyFilter, TextGate, TextHistory};
pub use pipeline::{
    DiagnosticKind, FrameStage, Observation, ObjectStage, PipelineControl, PipelineRunner,
    RunnerState, Session, TextStage,
};
pub use speech::{CommandSpeech, LogSpeech, RenderedSpeech, SpeechEngine, SpeechRenderer};
pub use voter::{Alert, ClassRule, PersistenceVoter, VoterSettings};
