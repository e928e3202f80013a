use super::{Rect, RenderView};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// View that renders into a v4l2loopback device as YUYV
///
/// Any program reading the loopback device sees the processed frames.
pub struct LoopbackView {
    path: PathBuf,
    bounds: Rect,
    file: Option<File>,
}

impl LoopbackView {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Self {
        Self {
            path: device_path.as_ref().to_path_buf(),
            bounds: Rect::from_size(width, height),
            file: None,
        }
    }

    /// Ask the driver for YUYV at the view size
    fn negotiate_format(&self) -> Result<()> {
        let device = Device::with_path(&self.path)
            .with_context(|| format!("Failed to open {} as a V4L2 device", self.path.display()))?;

        let requested = Format::new(self.bounds.width, self.bounds.height, FourCC::new(b"YUYV"));
        let actual = device
            .set_format(&requested)
            .context("Failed to set output format")?;

        if actual.width != requested.width || actual.height != requested.height {
            tracing::warn!(
                "Output device negotiated {}x{} instead of {}x{}",
                actual.width,
                actual.height,
                requested.width,
                requested.height
            );
        }

        Ok(())
    }
}

/// Convert RGB frame to YUV422 (YUYV) format
///
/// Each pair of pixels shares the averaged U and V; an odd trailing pixel is
/// paired with itself.
pub(crate) fn rgb_to_yuyv(frame: &RgbImage) -> Vec<u8> {
    let (width, height) = frame.dimensions();
    let mut yuyv = Vec::with_capacity((width.div_ceil(2) * 4 * height) as usize);

    for row in frame.rows() {
        let pixels: Vec<_> = row.collect();
        for pair in pixels.chunks(2) {
            let first = pair[0];
            let second = pair.get(1).copied().unwrap_or(first);

            let (y0, u0, v0) = rgb_to_yuv(first[0], first[1], first[2]);
            let (y1, u1, v1) = rgb_to_yuv(second[0], second[1], second[2]);

            let u = ((u0 as u16 + u1 as u16) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y0, u, y1, v]);
        }
    }

    yuyv
}

/// Convert RGB to YUV color space
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = (-0.147 * r - 0.289 * g + 0.436 * b + 128.0).clamp(0.0, 255.0) as u8;
    let v = (0.615 * r - 0.515 * g - 0.100 * b + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl RenderView for LoopbackView {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn allocate_device(&mut self) -> Result<()> {
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            self.path.display(),
            self.bounds.width,
            self.bounds.height
        );

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", self.path.display()))?;

        if let Err(e) = self.negotiate_format() {
            tracing::debug!("Keeping driver format for {}: {:#}", self.path.display(), e);
        }

        self.file = Some(file);
        Ok(())
    }

    fn draw(&mut self, frame: &RgbImage) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("No output device allocated for {}", self.path.display()))?;

        let (width, height) = (self.bounds.width, self.bounds.height);
        let yuyv = if frame.dimensions() != (width, height) {
            let resized = image::imageops::resize(
                frame,
                width,
                height,
                image::imageops::FilterType::Triangle,
            );
            rgb_to_yuyv(&resized)
        } else {
            rgb_to_yuyv(frame)
        };

        file.write_all(&yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}
