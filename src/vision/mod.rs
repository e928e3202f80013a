mod filters;

pub use filters::{create_filter, FilterKind, FrameFilter, MorphOp, Morphology};

use anyhow::{anyhow, Result};

use crate::capture::PixelBuffer;
use crate::render::RenderView;

/// Frame-processing endpoint of the capture pipeline
pub trait FrameBridge {
    /// Register the view processed frames are drawn into
    fn attach_view(&mut self, view: Box<dyn RenderView>);

    /// Process one frame synchronously
    ///
    /// The buffer is only borrowed for the duration of the call.
    fn submit(&mut self, frame: &PixelBuffer);
}

const FAILURE_LOG_INTERVAL: u64 = 30;

/// Bridge that runs a [`FrameFilter`] and draws the result to a view
pub struct VisionBridge {
    filter: Box<dyn FrameFilter>,
    view: Option<Box<dyn RenderView>>,
    failures: u64,
}

impl VisionBridge {
    pub fn new(filter: Box<dyn FrameFilter>) -> Self {
        tracing::info!("Vision bridge using {} filter", filter.name());
        Self {
            filter,
            view: None,
            failures: 0,
        }
    }

    fn process(&mut self, frame: &PixelBuffer) -> Result<()> {
        let view = match self.view.as_mut() {
            Some(view) => view,
            None => return Ok(()),
        };

        let rgb = frame.to_rgb().ok_or_else(|| {
            anyhow!(
                "{:?} buffer of {} bytes does not match {}x{}",
                frame.format,
                frame.data.len(),
                frame.width,
                frame.height
            )
        })?;

        let processed = {
            let _span = tracing::debug_span!("filter", name = self.filter.name()).entered();
            self.filter.apply(&rgb)?
        };

        let _span = tracing::debug_span!("draw").entered();
        view.draw(&processed)
    }
}

impl FrameBridge for VisionBridge {
    fn attach_view(&mut self, view: Box<dyn RenderView>) {
        let bounds = view.bounds();
        tracing::info!("Vision bridge attached to {}x{} view", bounds.width, bounds.height);
        self.view = Some(view);
    }

    fn submit(&mut self, frame: &PixelBuffer) {
        if self.view.is_none() {
            tracing::debug!("Frame submitted before a view was attached; skipping");
            return;
        }

        if let Err(e) = self.process(frame) {
            if self.failures % FAILURE_LOG_INTERVAL == 0 {
                tracing::warn!("Frame processing failed ({} so far): {:#}", self.failures + 1, e);
            }
            self.failures += 1;
        }
    }
}
