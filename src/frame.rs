//! Frames and frame-space geometry.
//!
//! Every capture backend normalizes into `Frame`, a packed RGB24 buffer. The
//! pipeline annotates frames in place before handing them to the host, and
//! generates diagnostic frames when there is no usable video to show.

use anyhow::{anyhow, Result};

/// Width of generated diagnostic frames.
pub const DIAGNOSTIC_WIDTH: u32 = 640;
/// Height of generated diagnostic frames.
pub const DIAGNOSTIC_HEIGHT: u32 = 480;

const BYTES_PER_PIXEL: usize = 3;

/// Caption tab geometry, roughly a 0.6-scale Hershey font.
const LABEL_HEIGHT: f32 = 14.0;
const LABEL_CHAR_WIDTH: f32 = 8.0;

// ----------------------------------------------------------------------------
// Frame: packed RGB24 image
// ----------------------------------------------------------------------------

/// A captured (or generated) RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Wrap an RGB24 buffer, validating its length against the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, color: Rgb) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&[color.0, color.1, color.2]);
        }
        Self {
            data,
            width,
            height,
            sequence: 0,
        }
    }

    /// Black frame with a red banner across the middle, shown in place of
    /// video when the device is unavailable or a read fails.
    pub fn diagnostic() -> Self {
        let mut frame = Self::solid(DIAGNOSTIC_WIDTH, DIAGNOSTIC_HEIGHT, Rgb::BLACK);
        let banner = BoundingBox::new(
            40.0,
            (DIAGNOSTIC_HEIGHT / 2 - 20) as f32,
            (DIAGNOSTIC_WIDTH - 40) as f32,
            (DIAGNOSTIC_HEIGHT / 2 + 20) as f32,
        );
        frame.fill_box(&banner, Rgb::RED);
        frame
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Frame area in square pixels.
    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }

    /// Mean over every channel byte, on a 0-255 scale.
    pub fn mean_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&b| b as u64).sum();
        (sum as f64 / self.data.len() as f64) as f32
    }

    /// Draw a rectangle outline, clipped to the frame.
    pub fn draw_box(&mut self, region: &BoundingBox, color: Rgb, thickness: u32) {
        let Some((x1, y1, x2, y2)) = self.clip(region) else {
            return;
        };
        let t = thickness.max(1);
        for y in y1..=y2 {
            for x in x1..=x2 {
                let on_edge = x < x1 + t || x + t > x2 || y < y1 + t || y + t > y2;
                if on_edge {
                    self.put(x, y, color);
                }
            }
        }
    }

    /// Fill a rectangle, clipped to the frame.
    pub fn fill_box(&mut self, region: &BoundingBox, color: Rgb) {
        let Some((x1, y1, x2, y2)) = self.clip(region) else {
            return;
        };
        for y in y1..=y2 {
            for x in x1..=x2 {
                self.put(x, y, color);
            }
        }
    }

    /// Solid caption tab sized for `chars` characters, sitting on top of
    /// `region`; moved inside the box when there is no room above it.
    /// No glyphs are rendered; the text itself is carried in the history.
    pub fn draw_label_tab(&mut self, region: &BoundingBox, chars: usize, color: Rgb) {
        if chars == 0 {
            return;
        }
        let left = region.x1.min(region.x2);
        let top = region.y1.min(region.y2);
        let width = (chars as f32 * LABEL_CHAR_WIDTH).max(LABEL_CHAR_WIDTH);
        let (y1, y2) = if top >= LABEL_HEIGHT {
            (top - LABEL_HEIGHT, top - 1.0)
        } else {
            (top, top + LABEL_HEIGHT - 1.0)
        };
        self.fill_box(&BoundingBox::new(left, y1, left + width - 1.0, y2), color);
    }

    fn clip(&self, region: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        if region.x1.max(region.x2) < 0.0 || region.y1.max(region.y2) < 0.0 {
            return None;
        }
        if region.x1.min(region.x2) > max_x || region.y1.min(region.y2) > max_y {
            return None;
        }
        let x1 = region.x1.min(region.x2).clamp(0.0, max_x) as u32;
        let x2 = region.x1.max(region.x2).clamp(0.0, max_x) as u32;
        let y1 = region.y1.min(region.y2).clamp(0.0, max_y) as u32;
        let y2 = region.y1.max(region.y2).clamp(0.0, max_y) as u32;
        Some((x1, y1, x2, y2))
    }

    fn put(&mut self, x: u32, y: u32, color: Rgb) {
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[offset] = color.0;
        self.data[offset + 1] = color.1;
        self.data[offset + 2] = color.2;
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Geometry and colors
// ----------------------------------------------------------------------------

/// Axis-aligned box in frame pixel coordinates (top-left / bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Area with negative extents treated as empty.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const GREY: Rgb = Rgb(128, 128, 128);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
