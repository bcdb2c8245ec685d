//! Temporal smoothing for the object pipeline.
//!
//! A single frame's detections flicker. `PersistenceVoter` keeps, per tracked
//! class, the hit/miss outcome of the last N frames and raises an alert only
//! when a class was hit in at least M of them. A cooldown after every alert
//! keeps a persistent scene from repeating itself, and every window is cleared
//! on fire so stale votes cannot re-trigger the moment the cooldown ends.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::detect::DetectionEvent;
use crate::error::AlertError;

pub const DEFAULT_WINDOW: usize = 5;
pub const DEFAULT_MAJORITY: usize = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);
pub const DEFAULT_MIN_AREA_FRACTION: f32 = 0.012;

/// Lowercase, with whitespace/underscore runs folded to `-`.
///
/// "Office Chair", "office_chair" and "office-chair" share one key.
pub fn normalize_label(raw: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[\s_]+").expect("static regex"));
    separators
        .replace_all(raw.trim(), "-")
        .to_lowercase()
}

/// A tracked class, its confidence threshold and what to say when it fires.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassRule {
    pub label: String,
    pub min_confidence: f32,
    pub announcement: String,
}

impl ClassRule {
    pub fn new(label: &str, min_confidence: f32, announcement: impl Into<String>) -> Self {
        Self {
            label: normalize_label(label),
            min_confidence,
            announcement: announcement.into(),
        }
    }
}

/// Built-in classes, in announcement priority order.
pub fn default_rules() -> Vec<ClassRule> {
    vec![
        ClassRule::new("office-chair", 0.80, "Chair ahead"),
        ClassRule::new("monitor", 0.60, "Monitor ahead"),
        ClassRule::new("books", 0.60, "Books ahead"),
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoterSettings {
    /// Window length N.
    pub window: usize,
    /// Hits M required in a full window.
    pub majority: usize,
    pub cooldown: Duration,
    /// Minimum box area as a fraction of the frame area.
    pub min_area_fraction: f32,
}

impl Default for VoterSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            majority: DEFAULT_MAJORITY,
            cooldown: DEFAULT_COOLDOWN,
            min_area_fraction: DEFAULT_MIN_AREA_FRACTION,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub label: String,
    pub announcement: String,
}

#[derive(Debug)]
struct ClassWindow {
    rule: ClassRule,
    votes: VecDeque<bool>,
}

impl ClassWindow {
    fn hits(&self) -> usize {
        self.votes.iter().filter(|&&hit| hit).count()
    }
}

#[derive(Debug)]
pub struct PersistenceVoter {
    classes: Vec<ClassWindow>,
    settings: VoterSettings,
    last_alert: Option<Instant>,
}

impl PersistenceVoter {
    pub fn new(rules: Vec<ClassRule>, settings: VoterSettings) -> Result<Self, AlertError> {
        if settings.window == 0 {
            return Err(AlertError::Config("vote window must be at least 1".into()));
        }
        if settings.majority == 0 || settings.majority > settings.window {
            return Err(AlertError::Config(format!(
                "vote majority must be within 1..={} (got {})",
                settings.window, settings.majority
            )));
        }
        let classes = rules
            .into_iter()
            .map(|rule| ClassWindow {
                rule,
                votes: VecDeque::with_capacity(settings.window),
            })
            .collect();
        Ok(Self {
            classes,
            settings,
            last_alert: None,
        })
    }

    pub fn settings(&self) -> &VoterSettings {
        &self.settings
    }

    pub fn observe(&mut self, detections: &[DetectionEvent], frame_area: f32) -> Option<Alert> {
        self.observe_at(detections, frame_area, Instant::now())
    }

    /// Vote on one frame's detections as of `now`; at most one alert per call.
    pub fn observe_at(
        &mut self,
        detections: &[DetectionEvent],
        frame_area: f32,
        now: Instant,
    ) -> Option<Alert> {
        let min_area = self.settings.min_area_fraction * frame_area;
        let labels: Vec<String> = detections
            .iter()
            .map(|det| normalize_label(&det.label))
            .collect();

        for class in &mut self.classes {
            let hit = detections.iter().zip(&labels).any(|(det, label)| {
                *label == class.rule.label
                    && det.confidence >= class.rule.min_confidence
                    && det.region.area() >= min_area
            });
            if class.votes.len() >= self.settings.window {
                class.votes.pop_front();
            }
            class.votes.push_back(hit);
        }

        if self.in_cooldown(now) {
            return None;
        }

        let window = self.settings.window;
        let majority = self.settings.majority;
        let winner = self
            .classes
            .iter()
            .find(|class| class.votes.len() == window && class.hits() >= majority)
            .map(|class| Alert {
                label: class.rule.label.clone(),
                announcement: class.rule.announcement.clone(),
            })?;

        for class in &mut self.classes {
            class.votes.clear();
        }
        self.last_alert = Some(now);
        log::debug!("PersistenceVoter: {} persisted, alerting", winner.label);
        Some(winner)
    }

    /// True while `now - last_alert <= cooldown`.
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.last_alert
            .is_some_and(|last| now.saturating_duration_since(last) <= self.settings.cooldown)
    }

    /// Clear every window and the cooldown.
    pub fn reset(&mut self) {
        for class in &mut self.classes {
            class.votes.clear();
        }
        self.last_alert = None;
    }

    /// Votes for `label`, oldest first.
    pub fn window(&self, label: &str) -> Option<Vec<bool>> {
        let key = normalize_label(label);
        self.classes
            .iter()
            .find(|class| class.rule.label == key)
            .map(|class| class.votes.iter().copied().collect())
    }

    /// `(label, votes)` for every tracked class, in priority order.
    pub fn windows(&self) -> Vec<(&str, Vec<bool>)> {
        self.classes
            .iter()
            .map(|class| (class.rule.label.as_str(), class.votes.iter().copied().collect()))
            .collect()
    }

    /// True when `label` (after normalization) is a tracked class.
    pub fn tracks(&self, label: &str) -> bool {
        let key = normalize_label(label);
        self.classes.iter().any(|class| class.rule.label == key)
    }

    /// One `label:votes` entry per class, e.g. `monitor:110`.
    pub fn summary(&self) -> String {
        self.classes
            .iter()
            .map(|class| {
                let votes: String = class
                    .votes
                    .iter()
                    .map(|&hit| if hit { '1' } else { '0' })
                    .collect();
                format!("{}:{}", class.rule.label, votes)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    const FRAME_AREA: f32 = 640.0 * 480.0;

    fn voter() -> PersistenceVoter {
        PersistenceVoter::new(default_rules(), VoterSettings::default()).expect("voter")
    }

    fn big(label: &str, confidence: f32) -> DetectionEvent {
        DetectionEvent::new(BoundingBox::new(100.0, 100.0, 300.0, 300.0), label, confidence)
    }

    /// Feed per-frame detections 100ms apart starting at `start`.
    fn feed(
        voter: &mut PersistenceVoter,
        start: Instant,
        frames: &[Vec<DetectionEvent>],
    ) -> Vec<Option<Alert>> {
        frames
            .iter()
            .enumerate()
            .map(|(i, dets)| {
                voter.observe_at(dets, FRAME_AREA, start + Duration::from_millis(100 * i as u64))
            })
            .collect()
    }

    fn monitor_pattern() -> Vec<Vec<DetectionEvent>> {
        vec![
            vec![big("monitor", 0.9)],
            vec![big("monitor", 0.9)],
            vec![big("monitor", 0.9)],
            vec![],
            vec![],
        ]
    }

    #[test]
    fn majority_of_full_window_fires_and_clears() {
        let mut voter = voter();
        let t0 = Instant::now();
        let outcomes = feed(&mut voter, t0, &monitor_pattern());

        assert!(outcomes[..4].iter().all(Option::is_none));
        assert_eq!(
            outcomes[4],
            Some(Alert {
                label: "monitor".into(),
                announcement: "Monitor ahead".into()
            })
        );
        for label in ["office-chair", "monitor", "books"] {
            assert_eq!(voter.window(label), Some(vec![]));
        }
    }

    #[test]
    fn partial_window_never_fires() {
        let mut voter = voter();
        let t0 = Instant::now();
        let frames = vec![vec![big("monitor", 0.9)]; 4];
        assert!(feed(&mut voter, t0, &frames).iter().all(Option::is_none));
        assert_eq!(voter.window("monitor"), Some(vec![true; 4]));
    }

    #[test]
    fn cooldown_suppresses_qualifying_votes() {
        let mut voter = voter();
        let t0 = Instant::now();
        assert!(feed(&mut voter, t0, &monitor_pattern())[4].is_some());
        let fired_at = t0 + Duration::from_millis(400);

        // Same pattern again, still inside the 3s cooldown.
        let outcomes = feed(&mut voter, fired_at + Duration::from_millis(500), &monitor_pattern());
        assert!(outcomes.iter().all(Option::is_none));
        assert!(voter.in_cooldown(fired_at + DEFAULT_COOLDOWN));
        assert!(!voter.in_cooldown(fired_at + DEFAULT_COOLDOWN + Duration::from_millis(1)));

        // Votes kept accumulating during the cooldown. Sliding in one more miss
        // leaves [1,1,0,0,0], which is below the majority.
        let late = fired_at + DEFAULT_COOLDOWN + Duration::from_millis(1);
        let alert = voter.observe_at(&[], FRAME_AREA, late);
        assert!(alert.is_none(), "window [1,1,0,0,0] no longer has a majority");
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let mut voter = voter();
        let t0 = Instant::now();
        feed(&mut voter, t0, &monitor_pattern());
        let fired_at = t0 + Duration::from_millis(400);

        let persistent = vec![vec![big("monitor", 0.9)]; 4];
        feed(&mut voter, fired_at + Duration::from_millis(100), &persistent);
        assert!(voter
            .observe_at(&[big("monitor", 0.9)], FRAME_AREA, fired_at + DEFAULT_COOLDOWN)
            .is_none());
        assert!(voter
            .observe_at(
                &[big("monitor", 0.9)],
                FRAME_AREA,
                fired_at + DEFAULT_COOLDOWN + Duration::from_millis(1)
            )
            .is_some());
    }

    #[test]
    fn priority_order_breaks_ties() {
        let mut voter = voter();
        let both = vec![vec![big("monitor", 0.9), big("office chair", 0.95)]; 5];
        let outcomes = feed(&mut voter, Instant::now(), &both);
        assert_eq!(outcomes[4].as_ref().map(|a| a.label.as_str()), Some("office-chair"));
    }

    #[test]
    fn confidence_and_area_gate_hits() {
        let mut voter = voter();
        let t0 = Instant::now();
        let tiny = DetectionEvent::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "monitor", 0.99);
        voter.observe_at(&[big("monitor", 0.59)], FRAME_AREA, t0);
        voter.observe_at(&[tiny], FRAME_AREA, t0);
        voter.observe_at(&[big("office_chair", 0.79)], FRAME_AREA, t0);
        voter.observe_at(&[big("lamp", 0.99)], FRAME_AREA, t0);
        voter.observe_at(&[big("Monitor", 0.60)], FRAME_AREA, t0);
        assert_eq!(
            voter.window("monitor"),
            Some(vec![false, false, false, false, true])
        );
        assert_eq!(voter.window("office-chair"), Some(vec![false; 5]));
    }

    #[test]
    fn windows_stay_bounded() {
        let mut voter = voter();
        let frames = vec![vec![]; 12];
        feed(&mut voter, Instant::now(), &frames);
        assert_eq!(voter.window("books").map(|w| w.len()), Some(DEFAULT_WINDOW));
    }

    #[test]
    fn reset_clears_windows_and_cooldown() {
        let mut voter = voter();
        let t0 = Instant::now();
        feed(&mut voter, t0, &monitor_pattern());
        assert!(voter.in_cooldown(t0 + Duration::from_secs(1)));
        voter.reset();
        assert!(!voter.in_cooldown(t0 + Duration::from_secs(1)));
        assert_eq!(voter.summary(), "office-chair: monitor: books:");
        assert!(voter.windows().iter().all(|(_, votes)| votes.is_empty()));
        assert!(voter.tracks("Office Chair"));
        assert!(!voter.tracks("lamp"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = VoterSettings {
            majority: 6,
            ..VoterSettings::default()
        };
        assert!(PersistenceVoter::new(default_rules(), settings).is_err());
    }

    #[test]
    fn labels_normalize() {
        assert_eq!(normalize_label(" Office  Chair "), "office-chair");
        assert_eq!(normalize_label("office__chair"), "office-chair");
    }
}
