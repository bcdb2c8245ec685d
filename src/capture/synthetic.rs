//! Synthetic capture devices for tests and hardware-free runs.
//!
//! A synthetic device reproduces the failure modes the probe exists for:
//! devices that open but only deliver black frames, devices that only light
//! up at particular resolutions, and devices whose reads fail intermittently.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{CaptureDevice, CaptureDriver, DeviceCandidate, FormatHint, Resolution};
use crate::frame::Frame;

/// Description of one synthetic device.
#[derive(Clone, Debug)]
pub struct SyntheticDevice {
    pub index: u32,
    /// Base brightness of produced frames (0 = solid black).
    pub brightness: u8,
    /// Resolutions that produce lit frames. `None` accepts any resolution.
    pub supported: Option<Vec<Resolution>>,
    /// Every n-th read fails.
    pub fail_every: Option<u64>,
}

impl SyntheticDevice {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            brightness: 96,
            supported: None,
            fail_every: None,
        }
    }

    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    pub fn with_supported(mut self, supported: Vec<Resolution>) -> Self {
        self.supported = Some(supported);
        self
    }

    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

/// Opens `SyntheticDevice`s by index, ignoring the backend hint.
#[derive(Clone, Debug)]
pub struct SyntheticDriver {
    devices: Vec<SyntheticDevice>,
    seed: u64,
}

impl SyntheticDriver {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self { devices, seed: 7 }
    }
}

impl Default for SyntheticDriver {
    fn default() -> Self {
        Self::new(vec![SyntheticDevice::new(0)])
    }
}

impl CaptureDriver for SyntheticDriver {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, candidate: &DeviceCandidate) -> Result<Box<dyn CaptureDevice>> {
        let profile = self
            .devices
            .iter()
            .find(|device| device.index == candidate.index)
            .cloned()
            .ok_or_else(|| anyhow!("no synthetic device at index {}", candidate.index))?;
        log::debug!("SyntheticDriver: opened stub://video{}", profile.index);
        let rng = StdRng::seed_from_u64(self.seed ^ profile.index as u64);
        Ok(Box::new(SyntheticCamera {
            profile,
            resolution: Resolution::new(640, 480),
            frame_count: 0,
            rng,
        }))
    }
}

struct SyntheticCamera {
    profile: SyntheticDevice,
    resolution: Resolution,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticCamera {
    fn is_live(&self) -> bool {
        match &self.profile.supported {
            Some(supported) => supported.contains(&self.resolution),
            None => true,
        }
    }

    /// Flat field at the base brightness with per-row sensor jitter and a
    /// brighter band that drifts down the frame.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let row_len = width * 3;
        if !self.is_live() {
            return vec![0u8; row_len * height];
        }

        let base = self.profile.brightness;
        let jitter = (base / 16) as i16;
        let band_rows = (height / 8).max(1);
        let band_start = (self.frame_count as usize * 4) % height.max(1);

        let mut pixels = Vec::with_capacity(row_len * height);
        for row in 0..height {
            let in_band = (row + height - band_start) % height.max(1) < band_rows;
            let level = if in_band {
                base.saturating_mul(2)
            } else if jitter > 0 {
                let offset = self.rng.gen_range(-jitter..=jitter);
                (base as i16 + offset).clamp(0, 255) as u8
            } else {
                base
            };
            pixels.resize(pixels.len() + row_len, level);
        }
        pixels
    }
}

impl CaptureDevice for SyntheticCamera {
    fn describe(&self) -> String {
        format!("stub://video{}", self.profile.index)
    }

    fn configure(&mut self, resolution: Resolution, _format: FormatHint) -> Result<()> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(anyhow!("resolution {} is empty", resolution));
        }
        self.resolution = resolution;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        if let Some(n) = self.profile.fail_every {
            if self.frame_count % n == 0 {
                return Err(anyhow!("synthetic read failure (frame {})", self.frame_count));
            }
        }
        let pixels = self.generate_pixels();
        Frame::from_rgb(
            pixels,
            self.resolution.width,
            self.resolution.height,
            self.frame_count,
        )
    }
}
