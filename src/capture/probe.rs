//! Capture device discovery.
//!
//! Driver enumeration is unreliable across platforms: a device can report a
//! successful open and then deliver nothing but black frames. `DeviceProbe`
//! walks the ordered search space in `CaptureConfig` and accepts the first
//! (device, resolution, format) combination whose sampled frames are
//! actually lit.

use std::thread;
use std::time::Duration;

use super::{CaptureConfig, CaptureDevice, CaptureDriver, DeviceCandidate, FormatHint, Resolution};
use crate::error::AlertError;
use crate::frame::Frame;

/// Liveness-check tunables.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeSettings {
    /// Frames sampled per (resolution, format) combination.
    pub samples: u32,
    /// Mean brightness (0-255) a frame must exceed to count as lit.
    pub brightness_floor: f32,
    /// Lit frames required to accept a combination.
    pub min_bright_frames: u32,
    /// Pause after a failed sample read.
    pub failed_read_delay: Duration,
    /// Pause after a successful sample read.
    pub sample_delay: Duration,
}

impl ProbeSettings {
    /// Same thresholds, no pauses between samples.
    pub fn without_delays(mut self) -> Self {
        self.failed_read_delay = Duration::ZERO;
        self.sample_delay = Duration::ZERO;
        self
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            samples: 20,
            brightness_floor: 8.0,
            min_bright_frames: 2,
            failed_read_delay: Duration::from_millis(30),
            sample_delay: Duration::from_millis(10),
        }
    }
}

/// An opened device together with the configuration that passed the probe.
///
/// Owns the device exclusively. Dropping the handle releases the device.
pub struct CaptureHandle {
    device: Box<dyn CaptureDevice>,
    pub candidate: DeviceCandidate,
    pub resolution: Resolution,
    pub format: FormatHint,
}

impl CaptureHandle {
    pub fn describe(&self) -> String {
        format!(
            "{} backend={} fourcc={} res={}",
            self.device.describe(),
            self.candidate.backend,
            self.format,
            self.resolution
        )
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn CaptureDevice {
        self.device.as_mut()
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("device", &self.device.describe())
            .field("candidate", &self.candidate)
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .finish()
    }
}

/// Progress hooks for a probe run.
pub trait ProbeObserver {
    fn on_attempt(&mut self, _candidate: &DeviceCandidate, _resolution: Resolution, _format: FormatHint) {}

    fn on_accepted(&mut self, _handle: &CaptureHandle) {}

    fn on_exhausted(&mut self, _attempts: usize) {}
}

pub struct NoopProbeObserver;

impl ProbeObserver for NoopProbeObserver {}

pub struct DeviceProbe {
    driver: Box<dyn CaptureDriver>,
    config: CaptureConfig,
    settings: ProbeSettings,
}

impl DeviceProbe {
    pub fn new<D: CaptureDriver + 'static>(
        driver: D,
        config: CaptureConfig,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            driver: Box::new(driver),
            config,
            settings,
        }
    }

    pub fn open(&mut self) -> Result<CaptureHandle, AlertError> {
        self.open_with(&mut NoopProbeObserver)
    }

    /// Probe the search space, reporting progress to `observer`.
    ///
    /// Returns the first accepted combination, or `DeviceUnavailable` once every
    /// candidate has been exhausted. Rejected devices are dropped (released)
    /// before the next candidate is opened.
    pub fn open_with(
        &mut self,
        observer: &mut dyn ProbeObserver,
    ) -> Result<CaptureHandle, AlertError> {
        let settings = self.config.settings();
        let mut attempts = 0usize;

        for candidate in &self.config.candidates {
            let mut device = match self.driver.open(candidate) {
                Ok(device) => device,
                Err(err) => {
                    log::debug!(
                        "DeviceProbe: index={} backend={} did not open: {}",
                        candidate.index,
                        candidate.backend,
                        err
                    );
                    continue;
                }
            };

            for &(resolution, format) in &settings {
                attempts += 1;
                observer.on_attempt(candidate, resolution, format);
                match try_configuration(device.as_mut(), resolution, format, &self.settings) {
                    Ok(true) => {
                        let handle = CaptureHandle {
                            device,
                            candidate: *candidate,
                            resolution,
                            format,
                        };
                        log::info!("DeviceProbe: accepted {}", handle.describe());
                        observer.on_accepted(&handle);
                        return Ok(handle);
                    }
                    Ok(false) => {
                        log::debug!(
                            "DeviceProbe: {} res={} fourcc={} produced no lit frames",
                            device.describe(),
                            resolution,
                            format
                        );
                    }
                    Err(err) => {
                        log::debug!(
                            "DeviceProbe: {} rejected res={} fourcc={}: {}",
                            device.describe(),
                            resolution,
                            format,
                            err
                        );
                    }
                }
            }
        }

        log::warn!(
            "DeviceProbe: no capture device passed the liveness check ({} configurations tried)",
            attempts
        );
        observer.on_exhausted(attempts);
        Err(AlertError::DeviceUnavailable { attempts })
    }
}

/// Apply one setting and sample frames until enough are lit or samples run out.
fn try_configuration(
    device: &mut dyn CaptureDevice,
    resolution: Resolution,
    format: FormatHint,
    settings: &ProbeSettings,
) -> anyhow::Result<bool> {
    device.configure(resolution, format)?;

    let mut lit = 0u32;
    for _ in 0..settings.samples {
        match device.read() {
            Ok(frame) => {
                if is_lit(&frame, settings.brightness_floor) {
                    lit += 1;
                }
                if lit >= settings.min_bright_frames {
                    return Ok(true);
                }
                pause(settings.sample_delay);
            }
            Err(_) => pause(settings.failed_read_delay),
        }
    }
    Ok(false)
}

fn is_lit(frame: &Frame, floor: f32) -> bool {
    frame.mean_brightness() > floor
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
