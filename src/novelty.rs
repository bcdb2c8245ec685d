//! Session-wide text de-duplication for the OCR pipeline.
//!
//! Each distinct phrase is announced at most once per session. Phrases are
//! compared by a normalized key (whitespace collapsed, trimmed, lowercased)
//! while the history keeps the text as it was first displayed.

use std::collections::{HashSet, VecDeque};

use crate::detect::RecognizedText;

/// Default number of distinct phrases remembered.
pub const DEFAULT_HISTORY_CAPACITY: usize = 300;

/// Collapse whitespace runs to one space, trim, lowercase.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Result of offering one phrase to the filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Novelty {
    pub is_novel: bool,
    pub key: String,
    pub display: String,
}

/// Bounded, insertion-ordered history paired with a membership set.
///
/// Each key in `keys` belongs to exactly one entry of `order`; evicting an
/// entry evicts its key.
#[derive(Debug)]
pub struct TextHistory {
    keys: HashSet<String>,
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl TextHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            keys: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String, display: String) {
        while self.order.len() >= self.capacity {
            if let Some((evicted, _)) = self.order.pop_front() {
                self.keys.remove(&evicted);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back((key, display));
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Display strings, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|(_, display)| display.as_str())
    }
}

#[derive(Debug)]
pub struct NoveltyFilter {
    history: TextHistory,
}

impl NoveltyFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: TextHistory::new(capacity),
        }
    }

    /// Record `raw` if its normalized key is unseen.
    ///
    /// Repeats, and texts that normalize to nothing, leave the history untouched.
    pub fn offer(&mut self, raw: &str) -> Novelty {
        let key = normalize_text(raw);
        let display = raw.trim().to_string();
        let is_novel = !key.is_empty() && !self.history.contains(&key);
        if is_novel {
            self.history.insert(key.clone(), display.clone());
        }
        Novelty {
            is_novel,
            key,
            display,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &TextHistory {
        &self.history
    }

    /// History joined one phrase per line, for display.
    pub fn history_text(&self) -> String {
        self.history.entries().collect::<Vec<_>>().join("\n")
    }
}

impl Default for NoveltyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Drops low-confidence and too-short recognitions before they reach the filter.
#[derive(Clone, Debug, PartialEq)]
pub struct TextGate {
    pub min_confidence: f32,
    /// Minimum length in characters, after trimming.
    pub min_len: usize,
}

impl TextGate {
    /// Trimmed text when the recognition passes the gate.
    pub fn accept<'a>(&self, recognized: &'a RecognizedText) -> Option<&'a str> {
        if recognized.confidence < self.min_confidence {
            return None;
        }
        let clean = recognized.text.trim();
        if clean.chars().count() < self.min_len {
            return None;
        }
        Some(clean)
    }
}

impl Default for TextGate {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_len: 2,
        }
    }
}
