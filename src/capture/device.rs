use nokhwa::query;
use nokhwa::utils::{ApiBackend, CameraInfo};

use super::error::CaptureError;
use super::types::{DeviceInput, DeviceLookup, MediaType, VideoDevice};
use super::DeviceDiscovery;

/// Devices reported by the platform camera backend
///
/// The first device the backend lists is treated as the system default.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl SystemDevices {
    fn list(&self) -> Result<Vec<VideoDevice>, String> {
        let devices = query(ApiBackend::Auto).map_err(|e| e.to_string())?;
        Ok(devices.iter().map(video_device).collect())
    }
}

fn video_device(info: &CameraInfo) -> VideoDevice {
    VideoDevice {
        index: info.index().clone(),
        name: info.human_name(),
        description: info.description().to_string(),
    }
}

impl DeviceDiscovery for SystemDevices {
    // Only video devices are listed by the backend
    fn default_device(&self, _media: MediaType) -> DeviceLookup {
        match self.list() {
            Ok(devices) => {
                tracing::debug!("Camera backend reports {} device(s)", devices.len());
                match devices.into_iter().next() {
                    Some(device) => DeviceLookup::Found(device),
                    None => DeviceLookup::NotFound,
                }
            }
            Err(e) => {
                tracing::debug!("Camera query failed: {}", e);
                DeviceLookup::NotFound
            }
        }
    }

    fn make_input(&self, device: &VideoDevice) -> Result<DeviceInput, CaptureError> {
        let devices = self
            .list()
            .map_err(|reason| CaptureError::DeviceInputConstructionFailed {
                device: device.name.clone(),
                reason,
            })?;

        if !devices.iter().any(|d| d.index == device.index) {
            return Err(CaptureError::DeviceInputConstructionFailed {
                device: device.name.clone(),
                reason: "device is no longer connected".to_string(),
            });
        }

        Ok(DeviceInput::new(device.clone()))
    }
}
