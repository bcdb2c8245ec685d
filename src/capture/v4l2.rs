//! V4L2 capture backend.
//!
//! Opens `/dev/video{index}`, applies the probe's resolution and FourCC
//! request, and streams through memory-mapped buffers. Frames are normalized
//! to RGB24 before they leave the device.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, WireFormat};
use super::{CaptureDevice, CaptureDriver, DeviceCandidate, FormatHint, Resolution};
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Debug, Default)]
pub struct V4l2Driver;

impl CaptureDriver for V4l2Driver {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&mut self, candidate: &DeviceCandidate) -> Result<Box<dyn CaptureDevice>> {
        let path = format!("/dev/video{}", candidate.index);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        log::debug!("V4l2Driver: opened {}", path);
        Ok(Box::new(V4l2Camera {
            path,
            device: Some(device),
            state: None,
            width: 0,
            height: 0,
            wire: WireFormat::Rgb24,
            frame_count: 0,
        }))
    }
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Camera {
    path: String,
    /// Present while no stream is running.
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    width: u32,
    height: u32,
    wire: WireFormat,
    frame_count: u64,
}

impl V4l2Camera {
    /// Stop any running stream and get the device back.
    fn take_device(&mut self) -> Result<v4l::Device> {
        if let Some(state) = self.state.take() {
            return Ok(state.into_heads().device);
        }
        self.device
            .take()
            .ok_or_else(|| anyhow!("v4l2 device {} lost", self.path))
    }

    fn apply_format(
        &mut self,
        device: &mut v4l::Device,
        resolution: Resolution,
        hint: FormatHint,
    ) -> Result<()> {
        use v4l::video::Capture;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = resolution.width;
        format.height = resolution.height;
        if let FormatHint::FourCc(code) = hint {
            format.fourcc = v4l::FourCC::new(&code);
        }
        let applied = device.set_format(&format).context("set v4l2 format")?;
        let wire = WireFormat::from_fourcc(&applied.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "unsupported pixel format {} on {}",
                String::from_utf8_lossy(&applied.fourcc.repr),
                self.path
            )
        })?;
        if applied.width != resolution.width || applied.height != resolution.height {
            log::debug!(
                "V4l2Camera: {} adjusted {} to {}x{}",
                self.path,
                resolution,
                applied.width,
                applied.height
            );
        }
        self.width = applied.width;
        self.height = applied.height;
        self.wire = wire;
        Ok(())
    }
}

impl CaptureDevice for V4l2Camera {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn configure(&mut self, resolution: Resolution, format: FormatHint) -> Result<()> {
        use v4l::buffer::Type;

        let mut device = self.take_device()?;
        if let Err(err) = self.apply_format(&mut device, resolution, format) {
            self.device = Some(device);
            return Err(err);
        }

        let built = StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build_or_recover();
        match built {
            Ok(state) => {
                self.state = Some(state);
                Ok(())
            }
            Err((err, heads)) => {
                self.device = Some(heads.device);
                Err(err)
            }
        }
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, wire) = (self.width, self.height, self.wire);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device {} not configured", self.path))?;
        let (pixels, width, height) = state.with_mut(|fields| -> Result<(Vec<u8>, u32, u32)> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            normalize_to_rgb(buf, width, height, wire)
        })?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, self.frame_count)
    }
}
