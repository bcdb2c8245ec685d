use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::capture::{CaptureConfig, DeviceCandidate, FormatHint, ProbeSettings, Resolution};
use crate::dispatch::DEFAULT_QUEUE_CAPACITY;
use crate::error::AlertError;
use crate::novelty::{TextGate, DEFAULT_HISTORY_CAPACITY};
use crate::pipeline::DEFAULT_DETECTOR_FLOOR;
use crate::speech::{CommandSpeech, LogSpeech, SpeechEngine};
use crate::voter::{default_rules, ClassRule, VoterSettings};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Read signs aloud (OCR).
    #[default]
    Text,
    /// Announce persistent obstacles.
    Objects,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "ocr" => Ok(PipelineMode::Text),
            "objects" | "object" => Ok(PipelineMode::Objects),
            other => Err(format!("unknown mode '{}', expected text or objects", other)),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineMode::Text => "text",
            PipelineMode::Objects => "objects",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngineKind {
    /// Write announcements to the log.
    Log,
    /// Run an external TTS program.
    #[default]
    Command,
}

// ----------------------------------------------------------------------------
// On-disk format (every field optional)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    mode: Option<PipelineMode>,
    capture: Option<CaptureConfigFile>,
    text: Option<TextConfigFile>,
    objects: Option<ObjectsConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    speech: Option<SpeechConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    candidates: Option<Vec<DeviceCandidate>>,
    resolutions: Option<Vec<Resolution>>,
    formats: Option<Vec<FormatHint>>,
    probe_samples: Option<u32>,
    brightness_floor: Option<f32>,
    min_bright_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TextConfigFile {
    min_confidence: Option<f32>,
    min_len: Option<usize>,
    history_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectsConfigFile {
    classes: Option<Vec<ClassRuleFile>>,
    window: Option<usize>,
    majority: Option<usize>,
    cooldown_secs: Option<f64>,
    min_area_fraction: Option<f32>,
    detector_floor: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ClassRuleFile {
    label: String,
    min_confidence: f32,
    announcement: String,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    engine: Option<SpeechEngineKind>,
    program: Option<String>,
    args: Option<Vec<String>>,
}

// ----------------------------------------------------------------------------
// Resolved configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub mode: PipelineMode,
    pub capture: CaptureConfig,
    pub probe: ProbeSettings,
    pub text: TextSettings,
    pub objects: ObjectSettings,
    pub queue_capacity: usize,
    pub speech: SpeechSettings,
}

#[derive(Debug, Clone)]
pub struct TextSettings {
    pub gate: TextGate,
    pub history_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ObjectSettings {
    /// Tracked classes in announcement priority order.
    pub rules: Vec<ClassRule>,
    pub voter: VoterSettings,
    pub detector_floor: f32,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub engine: SpeechEngineKind,
    /// External program; the platform default when unset.
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl SpeechSettings {
    pub fn build(&self) -> Box<dyn SpeechEngine> {
        match (self.engine, &self.program) {
            (SpeechEngineKind::Log, _) => Box::new(LogSpeech),
            (SpeechEngineKind::Command, Some(program)) => {
                Box::new(CommandSpeech::new(program.clone(), self.args.clone()))
            }
            (SpeechEngineKind::Command, None) => Box::new(CommandSpeech::platform_default()),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            capture: CaptureConfig::default(),
            probe: ProbeSettings::default(),
            text: TextSettings {
                gate: TextGate::default(),
                history_capacity: DEFAULT_HISTORY_CAPACITY,
            },
            objects: ObjectSettings {
                rules: default_rules(),
                voter: VoterSettings::default(),
                detector_floor: DEFAULT_DETECTOR_FLOOR,
            },
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            speech: SpeechSettings {
                engine: SpeechEngineKind::default(),
                program: None,
                args: Vec::new(),
            },
        }
    }
}

impl AlertsConfig {
    /// Defaults, then the file named by `ALERTS_CONFIG`, then `ALERTS_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ALERTS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` directly, ignoring `ALERTS_CONFIG` but still applying overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AlertsConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            candidates: capture_file.candidates.unwrap_or(defaults.candidates),
            resolutions: capture_file.resolutions.unwrap_or(defaults.resolutions),
            formats: capture_file.formats.unwrap_or(defaults.formats),
        };
        let probe_defaults = ProbeSettings::default();
        let probe = ProbeSettings {
            samples: capture_file.probe_samples.unwrap_or(probe_defaults.samples),
            brightness_floor: capture_file
                .brightness_floor
                .unwrap_or(probe_defaults.brightness_floor),
            min_bright_frames: capture_file
                .min_bright_frames
                .unwrap_or(probe_defaults.min_bright_frames),
            ..probe_defaults
        };

        let text_file = file.text.unwrap_or_default();
        let gate_defaults = TextGate::default();
        let text = TextSettings {
            gate: TextGate {
                min_confidence: text_file
                    .min_confidence
                    .unwrap_or(gate_defaults.min_confidence),
                min_len: text_file.min_len.unwrap_or(gate_defaults.min_len),
            },
            history_capacity: text_file.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
        };

        let objects_file = file.objects.unwrap_or_default();
        let voter_defaults = VoterSettings::default();
        let cooldown = match objects_file.cooldown_secs {
            Some(secs) => seconds(secs, "objects.cooldown_secs")?,
            None => voter_defaults.cooldown,
        };
        let rules = match objects_file.classes {
            Some(classes) => classes
                .into_iter()
                .map(|c| ClassRule::new(&c.label, c.min_confidence, c.announcement))
                .collect(),
            None => default_rules(),
        };
        let objects = ObjectSettings {
            rules,
            voter: VoterSettings {
                window: objects_file.window.unwrap_or(voter_defaults.window),
                majority: objects_file.majority.unwrap_or(voter_defaults.majority),
                cooldown,
                min_area_fraction: objects_file
                    .min_area_fraction
                    .unwrap_or(voter_defaults.min_area_fraction),
            },
            detector_floor: objects_file.detector_floor.unwrap_or(DEFAULT_DETECTOR_FLOOR),
        };

        let queue_capacity = file
            .dispatch
            .and_then(|dispatch| dispatch.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let speech_file = file.speech.unwrap_or_default();
        let speech = SpeechSettings {
            engine: speech_file.engine.unwrap_or_default(),
            program: speech_file.program.filter(|p| !p.trim().is_empty()),
            args: speech_file.args.unwrap_or_default(),
        };

        Ok(Self {
            mode: file.mode.unwrap_or_default(),
            capture,
            probe,
            text,
            objects,
            queue_capacity,
            speech,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("ALERTS_MODE") {
            if !mode.trim().is_empty() {
                self.mode = mode.parse().map_err(|e: String| anyhow!("ALERTS_MODE: {}", e))?;
            }
        }
        if let Ok(cooldown) = std::env::var("ALERTS_COOLDOWN_SECS") {
            let secs: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("ALERTS_COOLDOWN_SECS must be a number of seconds"))?;
            self.objects.voter.cooldown = seconds(secs, "ALERTS_COOLDOWN_SECS")?;
        }
        if let Ok(capacity) = std::env::var("ALERTS_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("ALERTS_QUEUE_CAPACITY must be a positive integer"))?;
        }
        if let Ok(program) = std::env::var("ALERTS_SPEECH_PROGRAM") {
            if !program.trim().is_empty() {
                self.speech.engine = SpeechEngineKind::Command;
                self.speech.program = Some(program);
            }
        }
        if let Ok(fraction) = std::env::var("ALERTS_MIN_AREA_FRACTION") {
            self.objects.voter.min_area_fraction = fraction
                .trim()
                .parse()
                .map_err(|_| anyhow!("ALERTS_MIN_AREA_FRACTION must be a number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let voter = &self.objects.voter;
        if voter.window == 0 {
            return Err(invalid("objects.window must be at least 1"));
        }
        if voter.majority == 0 || voter.majority > voter.window {
            return Err(invalid(format!(
                "objects.majority must be within 1..={} (got {})",
                voter.window, voter.majority
            )));
        }
        unit_interval(voter.min_area_fraction, "objects.min_area_fraction")?;
        unit_interval(self.objects.detector_floor, "objects.detector_floor")?;
        for rule in &self.objects.rules {
            if rule.label.is_empty() {
                return Err(invalid("objects.classes entries need a label"));
            }
            unit_interval(rule.min_confidence, &format!("threshold for {}", rule.label))?;
        }
        unit_interval(self.text.gate.min_confidence, "text.min_confidence")?;
        if self.text.history_capacity == 0 {
            return Err(invalid("text.history_capacity must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("dispatch.queue_capacity must be at least 1"));
        }
        if self.capture.candidates.is_empty() {
            return Err(invalid("capture.candidates must not be empty"));
        }
        if self.capture.resolutions.is_empty() {
            return Err(invalid("capture.resolutions must not be empty"));
        }
        if self.capture.formats.is_empty() {
            return Err(invalid("capture.formats must not be empty"));
        }
        if self.probe.samples == 0 || self.probe.min_bright_frames > self.probe.samples {
            return Err(invalid(format!(
                "capture.min_bright_frames ({}) must not exceed capture.probe_samples ({})",
                self.probe.min_bright_frames, self.probe.samples
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    AlertError::Config(message.into()).into()
}

fn unit_interval(value: f32, name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{} must be within [0, 1] (got {})", name, value)));
    }
    Ok(())
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("{} must be a non-negative number (got {})", name, value)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|_| invalid(format!("{} is out of range (got {})", name, value)))
}

fn read_config_file(path: &Path) -> Result<AlertsConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
