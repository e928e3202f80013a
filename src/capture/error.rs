use thiserror::Error;

/// Setup-time failures of the capture pipeline
///
/// These are logged where they occur and never returned past the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no default video capture device available")]
    DeviceUnavailable,

    #[error("session refused camera input from {device}")]
    InputRejected { device: String },

    #[error("session refused video data output")]
    OutputRejected,

    #[error("failed to create video device input for {device}: {reason}")]
    DeviceInputConstructionFailed { device: String, reason: String },
}
