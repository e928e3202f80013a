mod device;
mod error;
mod queue;
mod session;
pub mod types;

pub use device::SystemDevices;
pub use error::CaptureError;
pub use queue::{Delivery, MainQueue, QueueHandle, SampleBufferDelegate};
pub use session::NokhwaSession;
pub use types::{
    DeviceInput, DeviceLookup, DroppedSample, MediaType, PixelBuffer, PixelFormat, SampleBuffer,
    SessionPreset, VideoDataOutput, VideoDevice,
};

/// Trait for capture sessions
///
/// Configuration changes belong inside a `begin_configuration` /
/// `commit_configuration` bracket. Brackets nest; staged changes apply when
/// the outermost bracket commits. `can_add_*` must be checked before `add_*`.
pub trait CaptureSession {
    fn begin_configuration(&mut self);

    fn commit_configuration(&mut self);

    fn set_preset(&mut self, preset: SessionPreset);

    fn can_add_input(&self, input: &DeviceInput) -> bool;

    fn add_input(&mut self, input: DeviceInput);

    fn can_add_output(&self, output: &VideoDataOutput) -> bool;

    fn add_output(&mut self, output: VideoDataOutput);

    /// Start delivering frames to the attached output
    fn start_running(&mut self);

    fn is_running(&self) -> bool;
}

/// Trait for locating capture devices
pub trait DeviceDiscovery {
    /// The system default device for `media`
    fn default_device(&self, media: MediaType) -> DeviceLookup;

    /// Adapt a device into a session input
    fn make_input(&self, device: &VideoDevice) -> Result<DeviceInput, CaptureError>;
}
