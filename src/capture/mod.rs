//! Camera acquisition.
//!
//! This module provides:
//! - `CaptureConfig`: the ordered search space of devices, resolutions and pixel formats
//! - `DeviceProbe`: finds the first configuration that yields live (non-black) frames
//! - `CaptureSource`: one blocking frame read per call from the accepted device
//! - Backends: synthetic devices (always available) and V4L2 (feature: ingest-v4l2)
//!
//! Backends normalize every frame to RGB24 before it leaves this module.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod probe;
pub mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::frame::Frame;

pub use probe::{CaptureHandle, DeviceProbe, NoopProbeObserver, ProbeObserver, ProbeSettings};
pub use source::{CaptureSource, CaptureStats};
pub use synthetic::{SyntheticDevice, SyntheticDriver};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Driver;

/// Which capture backend a candidate should be opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendHint {
    /// First hardware backend compiled into this build.
    Auto,
    V4l2,
    Synthetic,
}

impl fmt::Display for BackendHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendHint::Auto => "auto",
            BackendHint::V4l2 => "v4l2",
            BackendHint::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct DeviceCandidate {
    pub index: u32,
    pub backend: BackendHint,
}

impl DeviceCandidate {
    pub const fn new(index: u32, backend: BackendHint) -> Self {
        Self { index, backend }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format requested from the driver. `Unset` leaves the driver default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum FormatHint {
    Unset,
    FourCc([u8; 4]),
}

impl FromStr for FormatHint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(FormatHint::Unset);
        }
        let bytes: [u8; 4] = trimmed
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow!("pixel format '{}' must be a four-character code", trimmed))?;
        Ok(FormatHint::FourCc(bytes))
    }
}

impl TryFrom<String> for FormatHint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatHint::Unset => f.write_str("driver-default"),
            FormatHint::FourCc(code) => f.write_str(&String::from_utf8_lossy(code)),
        }
    }
}

/// Ordered capture search space. Earlier entries win.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub candidates: Vec<DeviceCandidate>,
    pub resolutions: Vec<Resolution>,
    pub formats: Vec<FormatHint>,
}

impl CaptureConfig {
    /// Every (resolution, format) setting to try on an opened device, in order.
    pub fn settings(&self) -> Vec<(Resolution, FormatHint)> {
        self.resolutions
            .iter()
            .flat_map(|&res| self.formats.iter().map(move |&fmt| (res, fmt)))
            .collect()
    }

    /// Synthetic-only search space over the given device indices.
    pub fn synthetic(indices: &[u32]) -> Self {
        Self {
            candidates: indices
                .iter()
                .map(|&index| DeviceCandidate::new(index, BackendHint::Synthetic))
                .collect(),
            ..Self::default()
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let mut candidates = Vec::new();
        for backend in [BackendHint::V4l2, BackendHint::Auto] {
            for index in 0..=2 {
                candidates.push(DeviceCandidate::new(index, backend));
            }
        }
        Self {
            candidates,
            resolutions: vec![
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
                Resolution::new(640, 480),
            ],
            formats: vec![
                FormatHint::FourCc(*b"MJPG"),
                FormatHint::FourCc(*b"YUYV"),
                FormatHint::Unset,
            ],
        }
    }
}

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Human-readable identity (e.g. "/dev/video0").
    fn describe(&self) -> String;

    /// Request a resolution and pixel format. Drivers may silently adjust.
    fn configure(&mut self, resolution: Resolution, format: FormatHint) -> Result<()>;

    /// Blocking read of one frame, normalized to RGB24.
    fn read(&mut self) -> Result<Frame>;
}

/// Opens devices for candidates.
pub trait CaptureDriver: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self, candidate: &DeviceCandidate) -> Result<Box<dyn CaptureDevice>>;
}

/// Dispatches candidates to the backend their hint names.
pub struct SystemDriver {
    synthetic: SyntheticDriver,
    #[cfg(feature = "ingest-v4l2")]
    v4l2: V4l2Driver,
}

impl SystemDriver {
    pub fn new(synthetic: SyntheticDriver) -> Self {
        Self {
            synthetic,
            #[cfg(feature = "ingest-v4l2")]
            v4l2: V4l2Driver::default(),
        }
    }
}

impl Default for SystemDriver {
    fn default() -> Self {
        Self::new(SyntheticDriver::default())
    }
}

impl CaptureDriver for SystemDriver {
    fn name(&self) -> &'static str {
        "system"
    }

    fn open(&mut self, candidate: &DeviceCandidate) -> Result<Box<dyn CaptureDevice>> {
        match candidate.backend {
            BackendHint::Synthetic => self.synthetic.open(candidate),
            #[cfg(feature = "ingest-v4l2")]
            BackendHint::V4l2 | BackendHint::Auto => self.v4l2.open(candidate),
            #[cfg(not(feature = "ingest-v4l2"))]
            BackendHint::V4l2 | BackendHint::Auto => Err(anyhow!(
                "{} capture requires the ingest-v4l2 feature",
                candidate.backend
            )),
        }
    }
}
