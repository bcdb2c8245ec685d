use std::time::{Duration, Instant};

use super::CaptureHandle;
use crate::error::AlertError;
use crate::frame::Frame;

/// Frame source over a probed device.
///
/// Each `read_frame` is exactly one blocking read. Retry and backoff belong
/// to the caller; the source never reopens its device.
pub struct CaptureSource {
    handle: CaptureHandle,
    frames_captured: u64,
    read_failures: u64,
    consecutive_failures: u64,
    last_frame_at: Option<Instant>,
}

/// Statistics for a capture source.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub consecutive_failures: u64,
    pub device: String,
}

impl CaptureSource {
    pub fn new(handle: CaptureHandle) -> Self {
        Self {
            handle,
            frames_captured: 0,
            read_failures: 0,
            consecutive_failures: 0,
            last_frame_at: None,
        }
    }

    pub fn read_frame(&mut self) -> Result<Frame, AlertError> {
        match self.handle.device_mut().read() {
            Ok(frame) => {
                self.frames_captured += 1;
                self.consecutive_failures = 0;
                self.last_frame_at = Some(Instant::now());
                Ok(frame)
            }
            Err(err) => {
                self.read_failures += 1;
                self.consecutive_failures += 1;
                Err(AlertError::ReadFailure {
                    device: self.handle.describe(),
                    reason: format!("{:#}", err),
                })
            }
        }
    }

    /// Healthy while the last read succeeded and frames keep arriving within `grace`.
    pub fn is_healthy(&self, grace: Duration) -> bool {
        if self.consecutive_failures > 0 {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= grace
    }

    pub fn describe(&self) -> String {
        self.handle.describe()
    }

    pub fn handle(&self) -> &CaptureHandle {
        &self.handle
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured,
            read_failures: self.read_failures,
            consecutive_failures: self.consecutive_failures,
            device: self.handle.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        CaptureConfig, DeviceProbe, ProbeSettings, Resolution, SyntheticDevice, SyntheticDriver,
    };

    fn source(device: SyntheticDevice) -> CaptureSource {
        let config = CaptureConfig {
            resolutions: vec![Resolution::new(16, 12)],
            ..CaptureConfig::synthetic(&[device.index])
        };
        let mut probe = DeviceProbe::new(
            SyntheticDriver::new(vec![device]),
            config,
            ProbeSettings::default().without_delays(),
        );
        CaptureSource::new(probe.open().expect("synthetic device"))
    }

    #[test]
    fn reads_frames_and_counts_them() {
        let mut source = source(SyntheticDevice::new(0));
        let frame = source.read_frame().expect("frame");
        assert_eq!((frame.width, frame.height), (16, 12));
        assert_eq!(source.stats().frames_captured, 1);
        assert!(source.is_healthy(Duration::from_secs(2)));
    }

    #[test]
    fn read_failures_are_reported_not_retried() {
        // Probe consumes reads 1-2; read 3 fails.
        let mut source = source(SyntheticDevice::new(0).with_failure_every(3));
        let err = source.read_frame().unwrap_err();
        assert!(matches!(err, AlertError::ReadFailure { .. }));
        let stats = source.stats();
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert!(!source.is_healthy(Duration::from_secs(2)));

        assert!(source.read_frame().is_ok());
        assert_eq!(source.stats().consecutive_failures, 0);
    }
}
