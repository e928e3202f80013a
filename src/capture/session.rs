use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::queue::Delivery;
use super::types::{DeviceInput, PixelBuffer, SampleBuffer, SessionPreset, VideoDataOutput};
use super::CaptureSession;

const REQUESTED_FPS: u32 = 30;

#[derive(Debug, Clone)]
struct Configuration {
    preset: SessionPreset,
    input: Option<DeviceInput>,
    output: Option<VideoDataOutput>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            preset: SessionPreset::Hd1280x720,
            input: None,
            output: None,
        }
    }
}

/// Capture session backed by a nokhwa camera
///
/// Holds at most one input and one output. Once running, a background thread
/// owns the camera and pushes every decoded frame to the output's queue.
pub struct NokhwaSession {
    committed: Configuration,
    // Present while a configuration transaction is open
    staged: Option<Configuration>,
    depth: u32,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl NokhwaSession {
    pub fn new() -> Self {
        Self {
            committed: Configuration::default(),
            staged: None,
            depth: 0,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Preset of the applied configuration
    pub fn preset(&self) -> SessionPreset {
        self.committed.preset
    }

    /// Input of the applied configuration
    pub fn input(&self) -> Option<&DeviceInput> {
        self.committed.input.as_ref()
    }

    /// Output of the applied configuration
    ///
    /// None once the capture thread has taken it over.
    pub fn output(&self) -> Option<&VideoDataOutput> {
        self.committed.output.as_ref()
    }

    /// Number of configuration transactions not yet committed
    pub fn open_transactions(&self) -> u32 {
        self.depth
    }

    fn current(&self) -> &Configuration {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn current_mut(&mut self) -> &mut Configuration {
        match self.staged {
            Some(ref mut staged) => staged,
            None => &mut self.committed,
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if let Err(panic) = handle.join() {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!("Capture thread panicked: {}", message);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for NokhwaSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession for NokhwaSession {
    fn begin_configuration(&mut self) {
        if self.depth == 0 {
            self.staged = Some(self.committed.clone());
        }
        self.depth += 1;
    }

    fn commit_configuration(&mut self) {
        if self.depth == 0 {
            tracing::warn!("commit_configuration called without an open transaction");
            return;
        }

        self.depth -= 1;
        if self.depth == 0 {
            if let Some(staged) = self.staged.take() {
                self.committed = staged;
            }
            tracing::debug!(
                "Session configuration applied: preset={}, input={}, output={}",
                self.committed.preset,
                self.committed.input.is_some(),
                self.committed.output.is_some()
            );
        }
    }

    fn set_preset(&mut self, preset: SessionPreset) {
        self.current_mut().preset = preset;
    }

    fn can_add_input(&self, _input: &DeviceInput) -> bool {
        self.current().input.is_none()
    }

    fn add_input(&mut self, input: DeviceInput) {
        self.current_mut().input = Some(input);
    }

    fn can_add_output(&self, _output: &VideoDataOutput) -> bool {
        self.worker.is_none() && self.current().output.is_none()
    }

    fn add_output(&mut self, output: VideoDataOutput) {
        self.current_mut().output = Some(output);
    }

    fn start_running(&mut self) {
        if self.is_running() {
            return;
        }

        if self.depth > 0 {
            tracing::warn!(
                "Starting session with {} open configuration transaction(s); staged changes are not applied",
                self.depth
            );
        }

        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        // The worker takes the output so it holds the only queue sender; the
        // main queue disconnects once capture ends.
        let (input, output) = match (&self.committed.input, self.committed.output.take()) {
            (Some(input), Some(output)) => (input.clone(), output),
            (input, output) => {
                tracing::warn!(
                    "Session running without a complete pipeline (input={}, output={}); no frames will be delivered",
                    input.is_some(),
                    output.is_some()
                );
                self.committed.output = output;
                return;
            }
        };

        let preset = self.committed.preset;
        let stop = Arc::clone(&self.stop);
        let running = Arc::clone(&self.running);

        // The camera is opened inside the thread; nokhwa cameras are not Send
        self.worker = Some(std::thread::spawn(move || {
            if let Err(e) = capture_loop(&input, preset, &output, &stop) {
                tracing::error!("Capture stopped on {}: {:#}", input.device(), e);
            }
            running.store(false, Ordering::SeqCst);
        }));
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for NokhwaSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    input: &DeviceInput,
    preset: SessionPreset,
    output: &VideoDataOutput,
    stop: &AtomicBool,
) -> Result<()> {
    let (width, height) = preset.dimensions();
    tracing::info!("Opening {} at preset {}", input.device(), preset);

    let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, REQUESTED_FPS);
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(input.device().index.clone(), requested)
        .context("Failed to open camera")?;

    camera
        .open_stream()
        .context("Failed to open camera stream")?;

    let resolution = camera.resolution();
    tracing::info!(
        "Camera streaming at {}x{}",
        resolution.width(),
        resolution.height()
    );

    let mut sequence = 0u64;
    while !stop.load(Ordering::SeqCst) {
        let frame = camera.frame().context("Failed to capture frame")?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let buffer = PixelBuffer::from_rgb(&decoded, output.pixel_format(), output.gpu_compatible());
        if output.queue().deliver(SampleBuffer::new(sequence, buffer)) == Delivery::Closed {
            tracing::debug!("Main queue closed after {} frames", sequence);
            break;
        }
        sequence += 1;
    }

    if let Err(e) = camera.stop_stream() {
        tracing::debug!("Failed to stop camera stream: {}", e);
    }
    Ok(())
}
