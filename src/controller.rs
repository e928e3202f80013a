use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::capture::{
    CaptureError, CaptureSession, DeviceDiscovery, DeviceLookup, DroppedSample, MainQueue,
    MediaType, PixelFormat, QueueHandle, SampleBuffer, SampleBufferDelegate, SessionPreset,
    VideoDataOutput, VideoDevice,
};
use crate::render::{PreviewLayer, RenderView};
use crate::vision::FrameBridge;

pub const CAPTURE_PRESET: SessionPreset = SessionPreset::Hd1280x720;

const STATS_INTERVAL: u64 = 30;

/// Pipeline stage; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unconfigured,
    Configuring,
    Running,
}

/// Sample delegate that hands image buffers to the bridge
struct FrameForwarder {
    bridge: Box<dyn FrameBridge>,
    delivered: u64,
    submit_time: Duration,
}

impl SampleBufferDelegate for FrameForwarder {
    fn capture_output(&mut self, sample: SampleBuffer) {
        let Some(image_buffer) = sample.image_buffer() else {
            tracing::debug!("Sample {} carries no image buffer", sample.sequence);
            return;
        };

        let start = Instant::now();
        self.bridge.submit(image_buffer);
        self.submit_time += start.elapsed();
        self.delivered += 1;

        if self.delivered % STATS_INTERVAL == 0 {
            let avg_ms = self.submit_time.as_secs_f64() * 1000.0 / self.delivered as f64;
            tracing::info!("Frame {}: submit={:.1}ms", self.delivered, avg_ms);
        }
    }

    fn capture_dropped(&mut self, _sample: DroppedSample) {}
}

/// Owns the capture session and routes its frames to a [`FrameBridge`]
///
/// All frame callbacks run on the thread that calls [`CaptureController::run`],
/// [`CaptureController::run_for`] or [`CaptureController::drain_pending`].
pub struct CaptureController<S: CaptureSession> {
    session: S,
    state: ControllerState,
    preview: PreviewLayer,
    video_device: Option<VideoDevice>,
    queue: MainQueue,
    forwarder: FrameForwarder,
    diagnostics: Vec<CaptureError>,
}

impl<S: CaptureSession> CaptureController<S> {
    /// Configure and start capture, then bind the bridge to `view`
    ///
    /// Setup failures are logged and kept in [`CaptureController::diagnostics`];
    /// the controller is returned either way.
    pub fn initialize<D>(
        session: S,
        discovery: &D,
        mut view: Box<dyn RenderView>,
        bridge: Box<dyn FrameBridge>,
        queue_depth: usize,
    ) -> Self
    where
        D: DeviceDiscovery + ?Sized,
    {
        let (queue, handle) = MainQueue::new(queue_depth);

        let mut controller = Self {
            session,
            state: ControllerState::Unconfigured,
            preview: PreviewLayer::new(),
            video_device: None,
            queue,
            forwarder: FrameForwarder {
                bridge,
                delivered: 0,
                submit_time: Duration::ZERO,
            },
            diagnostics: Vec::new(),
        };

        controller.configure_session(discovery, view.as_ref(), handle);

        if let Err(e) = view.allocate_device() {
            tracing::warn!("Render device unavailable: {:#}", e);
        }
        controller.forwarder.bridge.attach_view(view);

        controller
    }

    fn configure_session<D>(&mut self, discovery: &D, view: &dyn RenderView, handle: QueueHandle)
    where
        D: DeviceDiscovery + ?Sized,
    {
        if self.state != ControllerState::Unconfigured {
            tracing::warn!("Session already configured");
            return;
        }
        self.state = ControllerState::Configuring;

        self.preview.set_frame(view.bounds());

        self.session.begin_configuration();
        self.session.set_preset(CAPTURE_PRESET);
        self.add_video_input(discovery);
        self.add_video_output(handle);
        self.session.commit_configuration();

        self.session.start_running();
        self.state = ControllerState::Running;
        tracing::info!("Capture session started at {}", CAPTURE_PRESET);
    }

    fn add_video_input<D>(&mut self, discovery: &D)
    where
        D: DeviceDiscovery + ?Sized,
    {
        let device = match discovery.default_device(MediaType::Video) {
            DeviceLookup::Found(device) => device,
            DeviceLookup::NotFound => {
                self.report(CaptureError::DeviceUnavailable);
                return;
            }
        };

        let input = match discovery.make_input(&device) {
            Ok(input) => input,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        if !self.session.can_add_input(&input) {
            self.report(CaptureError::InputRejected {
                device: device.name.clone(),
            });
            return;
        }

        self.session.add_input(input);
        tracing::info!("Camera input attached: {}", device);
        self.video_device = Some(device);
    }

    // On rejection the nested transaction is left open; the caller still
    // commits and starts the session.
    fn add_video_output(&mut self, handle: QueueHandle) {
        self.session.begin_configuration();

        let output = VideoDataOutput::new(PixelFormat::Bgra32, true, handle);

        if !self.session.can_add_output(&output) {
            self.report(CaptureError::OutputRejected);
            return;
        }

        self.session.add_output(output);
        self.session.commit_configuration();
    }

    fn report(&mut self, error: CaptureError) {
        tracing::warn!("Capture setup: {}", error);
        self.diagnostics.push(error);
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Setup failures in the order they occurred
    pub fn diagnostics(&self) -> &[CaptureError] {
        &self.diagnostics
    }

    pub fn preview_layer(&self) -> &PreviewLayer {
        &self.preview
    }

    /// Device attached as the session input, if any
    pub fn video_device(&self) -> Option<&VideoDevice> {
        self.video_device.as_ref()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Number of frames handed to the bridge so far
    pub fn frames_delivered(&self) -> u64 {
        self.forwarder.delivered
    }

    /// Deliver every queued frame without waiting
    pub fn drain_pending(&mut self) -> usize {
        self.queue.drain(&mut self.forwarder)
    }

    /// Deliver frames as they arrive until `duration` has passed
    ///
    /// Returns early if the capture side has shut down.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut delivered = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.queue.recv_timeout(&mut self.forwarder, remaining) {
                Ok(()) => delivered += 1,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        delivered
    }

    /// Deliver frames until the capture side shuts down
    pub fn run(&mut self) {
        tracing::info!("Delivering frames; press Ctrl+C to stop");
        while self.queue.recv(&mut self.forwarder).is_ok() {}
        tracing::info!(
            "Capture ended after {} delivered frames",
            self.forwarder.delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Delivery, DeviceInput, PixelBuffer};
    use crate::render::Rect;
    use anyhow::{anyhow, Result};
    use image::RgbImage;
    use nokhwa::utils::CameraIndex;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Begin,
        Commit,
        SetPreset(SessionPreset),
        AddInput,
        AddOutput,
        StartRunning,
    }

    /// Session that records calls and, once started, emits preset frames
    struct FakeSession {
        calls: Vec<Call>,
        accept_input: bool,
        accept_output: bool,
        frames_on_start: Vec<u64>,
        input: Option<DeviceInput>,
        output: Option<VideoDataOutput>,
        running: bool,
        depth: i32,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                accept_input: true,
                accept_output: true,
                frames_on_start: Vec::new(),
                input: None,
                output: None,
                running: false,
                depth: 0,
            }
        }

        fn emitting(frames: Vec<u64>) -> Self {
            Self {
                frames_on_start: frames,
                ..Self::new()
            }
        }

        fn emit(&self, sequence: u64) -> Delivery {
            let output = self.output.as_ref().expect("output attached");
            let rgb = RgbImage::new(2, 2);
            let buffer = PixelBuffer::from_rgb(&rgb, output.pixel_format(), output.gpu_compatible());
            output.queue().deliver(SampleBuffer::new(sequence, buffer))
        }
    }

    impl CaptureSession for FakeSession {
        fn begin_configuration(&mut self) {
            self.depth += 1;
            self.calls.push(Call::Begin);
        }

        fn commit_configuration(&mut self) {
            self.depth -= 1;
            self.calls.push(Call::Commit);
        }

        fn set_preset(&mut self, preset: SessionPreset) {
            self.calls.push(Call::SetPreset(preset));
        }

        fn can_add_input(&self, _input: &DeviceInput) -> bool {
            self.accept_input
        }

        fn add_input(&mut self, input: DeviceInput) {
            self.calls.push(Call::AddInput);
            self.input = Some(input);
        }

        fn can_add_output(&self, _output: &VideoDataOutput) -> bool {
            self.accept_output
        }

        fn add_output(&mut self, output: VideoDataOutput) {
            self.calls.push(Call::AddOutput);
            self.output = Some(output);
        }

        fn start_running(&mut self) {
            self.calls.push(Call::StartRunning);
            self.running = true;
            if self.input.is_some() && self.output.is_some() {
                for sequence in self.frames_on_start.clone() {
                    self.emit(sequence);
                }
            }
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    enum FakeDevices {
        Present,
        Absent,
        Unadaptable,
    }

    fn camera() -> VideoDevice {
        VideoDevice {
            index: CameraIndex::Index(0),
            name: "FaceTime HD Camera".to_string(),
            description: "fake".to_string(),
        }
    }

    impl DeviceDiscovery for FakeDevices {
        fn default_device(&self, _media: MediaType) -> DeviceLookup {
            match self {
                FakeDevices::Absent => DeviceLookup::NotFound,
                _ => DeviceLookup::Found(camera()),
            }
        }

        fn make_input(&self, device: &VideoDevice) -> Result<DeviceInput, CaptureError> {
            match self {
                FakeDevices::Unadaptable => Err(CaptureError::DeviceInputConstructionFailed {
                    device: device.name.clone(),
                    reason: "busy".to_string(),
                }),
                _ => Ok(DeviceInput::new(device.clone())),
            }
        }
    }

    #[derive(Default)]
    struct BridgeLog {
        attached: Option<Rect>,
        submitted: Vec<PixelBuffer>,
    }

    struct RecordingBridge(Rc<RefCell<BridgeLog>>);

    impl FrameBridge for RecordingBridge {
        fn attach_view(&mut self, view: Box<dyn RenderView>) {
            self.0.borrow_mut().attached = Some(view.bounds());
        }

        fn submit(&mut self, frame: &PixelBuffer) {
            self.0.borrow_mut().submitted.push(frame.clone());
        }
    }

    struct FakeView {
        fail_allocation: bool,
    }

    impl RenderView for FakeView {
        fn bounds(&self) -> Rect {
            Rect::from_size(640, 360)
        }

        fn allocate_device(&mut self) -> Result<()> {
            if self.fail_allocation {
                Err(anyhow!("no device"))
            } else {
                Ok(())
            }
        }

        fn draw(&mut self, _frame: &RgbImage) -> Result<()> {
            Ok(())
        }
    }

    fn start(
        session: FakeSession,
        devices: FakeDevices,
    ) -> (CaptureController<FakeSession>, Rc<RefCell<BridgeLog>>) {
        let log = Rc::new(RefCell::new(BridgeLog::default()));
        let controller = CaptureController::initialize(
            session,
            &devices,
            Box::new(FakeView {
                fail_allocation: false,
            }),
            Box::new(RecordingBridge(Rc::clone(&log))),
            8,
        );
        (controller, log)
    }

    fn submitted_count(log: &Rc<RefCell<BridgeLog>>) -> usize {
        log.borrow().submitted.len()
    }

    #[test]
    fn running_with_camera_delivers_frames() {
        let (mut controller, log) = start(FakeSession::emitting(vec![0, 1]), FakeDevices::Present);

        assert_eq!(controller.state(), ControllerState::Running);
        assert!(controller.session().is_running());
        assert!(controller.diagnostics().is_empty());
        assert_eq!(controller.video_device(), Some(&camera()));

        let delivered = controller.run_for(Duration::from_millis(200));
        assert!(delivered >= 1);
        assert_eq!(submitted_count(&log), 2);
        assert_eq!(controller.frames_delivered(), 2);
    }

    #[test]
    fn missing_camera_reports_once_and_delivers_nothing() {
        let (mut controller, log) = start(FakeSession::emitting(vec![0, 1]), FakeDevices::Absent);

        assert_eq!(controller.diagnostics(), &[CaptureError::DeviceUnavailable]);
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(controller.video_device().is_none());

        assert_eq!(controller.run_for(Duration::from_millis(20)), 0);
        assert_eq!(controller.drain_pending(), 0);
        assert_eq!(submitted_count(&log), 0);
    }

    #[test]
    fn output_is_bgra_and_gpu_compatible() {
        let (controller, _log) = start(FakeSession::new(), FakeDevices::Present);

        let output = controller.session().output.as_ref().expect("output attached");
        assert_eq!(output.pixel_format(), PixelFormat::Bgra32);
        assert!(output.gpu_compatible());
    }

    #[test]
    fn submitted_buffers_keep_output_format() {
        let (mut controller, log) = start(FakeSession::emitting(vec![0]), FakeDevices::Present);
        controller.drain_pending();

        let log = log.borrow();
        assert_eq!(log.submitted[0].format, PixelFormat::Bgra32);
        assert!(log.submitted[0].gpu_compatible);
    }

    #[test]
    fn dropped_frames_never_reach_bridge() {
        let log = Rc::new(RefCell::new(BridgeLog::default()));
        let mut controller = CaptureController::initialize(
            FakeSession::new(),
            &FakeDevices::Present,
            Box::new(FakeView {
                fail_allocation: false,
            }),
            Box::new(RecordingBridge(Rc::clone(&log))),
            2,
        );

        let outcomes: Vec<Delivery> = (0..5).map(|s| controller.session().emit(s)).collect();
        assert_eq!(outcomes.iter().filter(|d| **d == Delivery::Dropped).count(), 3);

        assert_eq!(controller.drain_pending(), 2);
        let log = log.borrow();
        assert_eq!(log.submitted.len(), 2);
    }

    #[test]
    fn frames_reach_bridge_in_capture_order() {
        let (mut controller, log) = start(FakeSession::new(), FakeDevices::Present);

        for sequence in [1u64, 2, 3] {
            // Tag each synthetic frame by its width
            let output = controller.session().output.clone().expect("output attached");
            let rgb = RgbImage::new(sequence as u32, 1);
            let buffer = PixelBuffer::from_rgb(&rgb, output.pixel_format(), output.gpu_compatible());
            assert_eq!(output.queue().deliver(SampleBuffer::new(sequence, buffer)), Delivery::Queued);
        }

        controller.drain_pending();

        let widths: Vec<u32> = log.borrow().submitted.iter().map(|f| f.width).collect();
        assert_eq!(widths, vec![1, 2, 3]);
    }

    #[test]
    fn rejected_output_still_commits_and_starts() {
        let mut session = FakeSession::new();
        session.accept_output = false;
        let (controller, _log) = start(session, FakeDevices::Present);

        assert_eq!(
            controller.session().calls,
            vec![
                Call::Begin,
                Call::SetPreset(SessionPreset::Hd1280x720),
                Call::AddInput,
                Call::Begin,
                Call::Commit,
                Call::StartRunning,
            ]
        );
        // The nested transaction opened for the output is never closed
        assert_eq!(controller.session().depth, 1);
        assert_eq!(controller.diagnostics(), &[CaptureError::OutputRejected]);
        assert_eq!(controller.state(), ControllerState::Running);
    }

    #[test]
    fn successful_configuration_is_balanced() {
        let (controller, _log) = start(FakeSession::new(), FakeDevices::Present);

        assert_eq!(
            controller.session().calls,
            vec![
                Call::Begin,
                Call::SetPreset(SessionPreset::Hd1280x720),
                Call::AddInput,
                Call::Begin,
                Call::AddOutput,
                Call::Commit,
                Call::Commit,
                Call::StartRunning,
            ]
        );
        assert_eq!(controller.session().depth, 0);
    }

    #[test]
    fn rejected_input_continues_with_output() {
        let mut session = FakeSession::new();
        session.accept_input = false;
        let (controller, _log) = start(session, FakeDevices::Present);

        assert_eq!(
            controller.diagnostics(),
            &[CaptureError::InputRejected {
                device: "FaceTime HD Camera".to_string()
            }]
        );
        assert!(controller.session().input.is_none());
        assert!(controller.session().output.is_some());
        assert!(controller.session().calls.contains(&Call::StartRunning));
        assert!(controller.video_device().is_none());
    }

    #[test]
    fn input_construction_failure_is_reported() {
        let (controller, _log) = start(FakeSession::new(), FakeDevices::Unadaptable);

        assert!(matches!(
            controller.diagnostics(),
            [CaptureError::DeviceInputConstructionFailed { .. }]
        ));
        assert!(controller.session().input.is_none());
    }

    #[test]
    fn preview_matches_view_and_bridge_is_attached() {
        let (controller, log) = start(FakeSession::new(), FakeDevices::Present);

        assert_eq!(controller.preview_layer().frame(), Rect::from_size(640, 360));
        assert_eq!(log.borrow().attached, Some(Rect::from_size(640, 360)));
    }

    #[test]
    fn render_device_failure_still_attaches_bridge() {
        let log = Rc::new(RefCell::new(BridgeLog::default()));
        let controller = CaptureController::initialize(
            FakeSession::new(),
            &FakeDevices::Present,
            Box::new(FakeView {
                fail_allocation: true,
            }),
            Box::new(RecordingBridge(Rc::clone(&log))),
            2,
        );

        assert_eq!(controller.state(), ControllerState::Running);
        assert!(log.borrow().attached.is_some());
    }

    #[test]
    fn sample_without_image_buffer_is_skipped() {
        let (mut controller, log) = start(FakeSession::new(), FakeDevices::Present);
        let output = controller.session().output.clone().expect("output attached");

        output.queue().deliver(SampleBuffer {
            sequence: 0,
            image_buffer: None,
        });
        controller.drain_pending();

        assert_eq!(submitted_count(&log), 0);
        assert_eq!(controller.frames_delivered(), 0);
    }

    #[test]
    fn run_returns_when_capture_side_disconnects() {
        let (mut controller, log) = start(FakeSession::emitting(vec![0, 1, 2]), FakeDevices::Present);

        // Dropping the session's output closes the producer side
        controller.session.output = None;
        controller.run();

        assert_eq!(submitted_count(&log), 3);
    }
}
