//! Perception collaborators.
//!
//! Object detection and text recognition models live outside this crate.
//! The pipeline consumes them through `ObjectDetector` and `TextRecognizer`;
//! `Scripted` stands in for a model in tests and hardware-free runs.

mod scripted;

use anyhow::Result;
use serde::Deserialize;

use crate::frame::{BoundingBox, Frame};

pub use scripted::Scripted;

/// One detected object in a frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DetectionEvent {
    pub region: BoundingBox,
    pub label: String,
    /// 0.0..=1.0
    pub confidence: f32,
}

impl DetectionEvent {
    pub fn new(region: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            region,
            label: label.into(),
            confidence,
        }
    }
}

/// One recognized text span in a frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RecognizedText {
    pub region: BoundingBox,
    pub text: String,
    /// 0.0..=1.0
    pub confidence: f32,
}

impl RecognizedText {
    pub fn new(region: BoundingBox, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            region,
            text: text.into(),
            confidence,
        }
    }
}

/// Object detector contract: synchronous, no side effects expected.
///
/// The pipeline imposes no timeout; a detector that hangs stalls the frame loop.
pub trait ObjectDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>>;
}

/// Text recognizer contract: synchronous, no side effects expected.
pub trait TextRecognizer: Send {
    fn name(&self) -> &'static str;

    fn recognize(&mut self, frame: &Frame) -> Result<Vec<RecognizedText>>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>> {
        (**self).detect(frame)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn recognize(&mut self, frame: &Frame) -> Result<Vec<RecognizedText>> {
        (**self).recognize(frame)
    }
}
