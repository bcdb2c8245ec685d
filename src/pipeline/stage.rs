//! Per-frame processing stages.
//!
//! A stage runs the external model on one frame, annotates the frame in place
//! and decides what, if anything, should be spoken.

use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::{DetectionEvent, ObjectDetector, TextRecognizer};
use crate::frame::{Frame, Rgb};
use crate::novelty::{NoveltyFilter, TextGate, DEFAULT_HISTORY_CAPACITY};
use crate::voter::PersistenceVoter;

const BOX_THICKNESS: u32 = 2;

/// Confidence below which object detections are neither drawn nor voted on.
pub const DEFAULT_DETECTOR_FLOOR: f32 = 0.25;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageOutput {
    /// Texts to hand to the dispatcher, in order.
    pub notifications: Vec<String>,
    /// Boxes drawn on the frame.
    pub boxes: usize,
}

pub trait FrameStage {
    fn name(&self) -> &'static str;

    /// Confidence floor reported on the debug line.
    fn confidence_floor(&self) -> f32;

    fn process(&mut self, frame: &mut Frame) -> Result<StageOutput>;

    /// Cumulative, human-readable session history.
    fn history(&self) -> String;

    fn reset(&mut self);
}

// ----------------------------------------------------------------------------
// Text
// ----------------------------------------------------------------------------

/// Recognize text, announce each phrase the first time it is seen.
///
/// Accepted regions get a green outline with a caption tab above it.
pub struct TextStage<R> {
    recognizer: R,
    gate: TextGate,
    filter: NoveltyFilter,
}

impl<R: TextRecognizer> TextStage<R> {
    pub fn new(recognizer: R, gate: TextGate, filter: NoveltyFilter) -> Self {
        Self {
            recognizer,
            gate,
            filter,
        }
    }
}

impl<R: TextRecognizer> FrameStage for TextStage<R> {
    fn name(&self) -> &'static str {
        "text"
    }

    fn confidence_floor(&self) -> f32 {
        self.gate.min_confidence
    }

    /// All novel phrases of one frame are joined into a single announcement.
    fn process(&mut self, frame: &mut Frame) -> Result<StageOutput> {
        let recognized = self.recognizer.recognize(frame)?;
        let mut novel = Vec::new();
        let mut boxes = 0;
        for item in &recognized {
            let Some(clean) = self.gate.accept(item) else {
                continue;
            };
            frame.draw_box(&item.region, Rgb::GREEN, BOX_THICKNESS);
            frame.draw_label_tab(&item.region, clean.chars().count(), Rgb::GREEN);
            boxes += 1;
            let outcome = self.filter.offer(clean);
            if outcome.is_novel {
                novel.push(outcome.display);
            }
        }
        let notifications = if novel.is_empty() {
            Vec::new()
        } else {
            vec![novel.join(". ")]
        };
        Ok(StageOutput {
            notifications,
            boxes,
        })
    }

    fn history(&self) -> String {
        self.filter.history_text()
    }

    fn reset(&mut self) {
        self.filter.reset();
    }
}

// ----------------------------------------------------------------------------
// Objects
// ----------------------------------------------------------------------------

/// Detect objects, announce tracked classes that persist across frames.
pub struct ObjectStage<D> {
    detector: D,
    voter: PersistenceVoter,
    detector_floor: f32,
    alerts: VecDeque<String>,
}

impl<D: ObjectDetector> ObjectStage<D> {
    pub fn new(detector: D, voter: PersistenceVoter) -> Self {
        Self {
            detector,
            voter,
            detector_floor: DEFAULT_DETECTOR_FLOOR,
            alerts: VecDeque::new(),
        }
    }

    pub fn with_detector_floor(mut self, floor: f32) -> Self {
        self.detector_floor = floor;
        self
    }

    pub fn voter(&self) -> &PersistenceVoter {
        &self.voter
    }
}

impl<D: ObjectDetector> FrameStage for ObjectStage<D> {
    fn name(&self) -> &'static str {
        "objects"
    }

    fn confidence_floor(&self) -> f32 {
        self.detector_floor
    }

    fn process(&mut self, frame: &mut Frame) -> Result<StageOutput> {
        let detections: Vec<DetectionEvent> = self
            .detector
            .detect(frame)?
            .into_iter()
            .filter(|det| det.confidence >= self.detector_floor)
            .collect();

        for det in &detections {
            let color = if self.voter.tracks(&det.label) {
                Rgb::GREEN
            } else {
                Rgb::GREY
            };
            frame.draw_box(&det.region, color, BOX_THICKNESS);
        }

        let mut notifications = Vec::new();
        if let Some(alert) = self.voter.observe(&detections, frame.area()) {
            log::info!("ObjectStage: {} -> \"{}\"", alert.label, alert.announcement);
            if self.alerts.len() >= DEFAULT_HISTORY_CAPACITY {
                self.alerts.pop_front();
            }
            self.alerts.push_back(alert.announcement.clone());
            notifications.push(alert.announcement);
        }

        Ok(StageOutput {
            notifications,
            boxes: detections.len(),
        })
    }

    /// Past announcements, then the current vote windows.
    fn history(&self) -> String {
        let mut lines: Vec<String> = self.alerts.iter().cloned().collect();
        lines.push(format!("votes: {}", self.voter.summary()));
        lines.join("\n")
    }

    fn reset(&mut self) {
        self.voter.reset();
        self.alerts.clear();
    }
}
