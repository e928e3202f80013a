mod loopback;

pub use loopback::LoopbackView;

use anyhow::Result;
use image::RgbImage;

/// Size of a view, anchored at its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Trait for views that display processed frames
pub trait RenderView {
    /// Visible area of the view
    fn bounds(&self) -> Rect;

    /// Acquire the device the view renders into
    ///
    /// Frames drawn before this succeeds are rejected.
    fn allocate_device(&mut self) -> Result<()>;

    /// Display a frame, scaling it to the view bounds
    fn draw(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Preview of the live capture hosted inside a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewLayer {
    frame: Rect,
}

impl PreviewLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> Rect {
        self.frame
    }

    pub fn set_frame(&mut self, frame: Rect) {
        self.frame = frame;
    }
}
