use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

use super::{DetectionEvent, ObjectDetector, RecognizedText, TextRecognizer};
use crate::frame::Frame;

/// Replays a fixed per-frame script of model outputs.
///
/// Call `n` returns the script's `n`-th entry; past the end it wraps when
/// `repeat` is set and returns nothing otherwise.
#[derive(Clone, Debug)]
pub struct Scripted<T> {
    frames: Vec<Vec<T>>,
    repeat: bool,
    cursor: usize,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct ScriptFile<T> {
    #[serde(default)]
    repeat: bool,
    frames: Vec<Vec<T>>,
}

impl<T: Clone> Scripted<T> {
    pub fn new(frames: Vec<Vec<T>>) -> Self {
        Self {
            frames,
            repeat: false,
            cursor: 0,
        }
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    fn next_outputs(&mut self) -> Vec<T> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        if self.cursor >= self.frames.len() {
            if !self.repeat {
                return Vec::new();
            }
            self.cursor = 0;
        }
        let outputs = self.frames[self.cursor].clone();
        self.cursor += 1;
        outputs
    }
}

impl<T: Clone + DeserializeOwned> Scripted<T> {
    /// Load a script file: `{"repeat": bool, "frames": [[...], ...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read script {}: {}", path.display(), e))?;
        let file: ScriptFile<T> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid script {}: {}", path.display(), e))?;
        Ok(Self {
            frames: file.frames,
            repeat: file.repeat,
            cursor: 0,
        })
    }
}

impl ObjectDetector for Scripted<DetectionEvent> {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectionEvent>> {
        Ok(self.next_outputs())
    }
}

impl TextRecognizer for Scripted<RecognizedText> {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&mut self, _frame: &Frame) -> Result<Vec<RecognizedText>> {
        Ok(self.next_outputs())
    }
}
