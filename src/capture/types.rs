use image::RgbImage;
use nokhwa::utils::CameraIndex;
use std::fmt;

use super::queue::QueueHandle;

/// Named capture resolution profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPreset {
    Hd1280x720,
}

impl SessionPreset {
    /// Returns (width, height)
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            SessionPreset::Hd1280x720 => (1280, 720),
        }
    }
}

impl fmt::Display for SessionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "{}x{}", width, height)
    }
}

/// Pixel layout of a delivered image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit B, G, R, A byte order
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }

    /// Bytes needed for a `width` x `height` buffer, computed in usize
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Media kind used when asking for a default device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
}

/// A capture device known to the platform
///
/// The platform owns the physical device; this is only a reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDevice {
    pub index: CameraIndex,
    pub name: String,
    pub description: String,
}

impl fmt::Display for VideoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.name)
    }
}

/// Result of looking up a device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceLookup {
    Found(VideoDevice),
    NotFound,
}

/// A device adapted for attachment to a session
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInput {
    device: VideoDevice,
}

impl DeviceInput {
    pub fn new(device: VideoDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &VideoDevice {
        &self.device
    }
}

/// Frame-output sink configuration
///
/// Describes how frames are formatted and which serial queue receives them.
/// Settings are fixed at construction.
#[derive(Debug, Clone)]
pub struct VideoDataOutput {
    pixel_format: PixelFormat,
    gpu_compatible: bool,
    queue: QueueHandle,
}

impl VideoDataOutput {
    pub fn new(pixel_format: PixelFormat, gpu_compatible: bool, queue: QueueHandle) -> Self {
        Self {
            pixel_format,
            gpu_compatible,
            queue,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn gpu_compatible(&self) -> bool {
        self.gpu_compatible
    }

    /// Queue the sample delegate callbacks are dispatched to
    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }
}

/// Raw image buffer of one captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub gpu_compatible: bool,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Build a buffer in `format` from a decoded RGB frame
    pub fn from_rgb(image: &RgbImage, format: PixelFormat, gpu_compatible: bool) -> Self {
        let (width, height) = image.dimensions();
        let data = match format {
            PixelFormat::Bgra32 => {
                let mut data = Vec::with_capacity(format.buffer_len(width, height));
                for pixel in image.pixels() {
                    data.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 255]);
                }
                data
            }
        };

        Self {
            width,
            height,
            format,
            gpu_compatible,
            data,
        }
    }

    /// Row stride in bytes
    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Convert back to RGB, dropping alpha
    ///
    /// Returns None if the data length does not match the dimensions.
    pub fn to_rgb(&self) -> Option<RgbImage> {
        if self.data.len() != self.format.buffer_len(self.width, self.height) {
            return None;
        }

        match self.format {
            PixelFormat::Bgra32 => {
                let rgb: Vec<u8> = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|bgra| [bgra[2], bgra[1], bgra[0]])
                    .collect();
                RgbImage::from_raw(self.width, self.height, rgb)
            }
        }
    }
}

/// One captured sample as delivered to the sample delegate
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Position in capture order, starting at 0
    pub sequence: u64,
    pub image_buffer: Option<PixelBuffer>,
}

impl SampleBuffer {
    pub fn new(sequence: u64, image_buffer: PixelBuffer) -> Self {
        Self {
            sequence,
            image_buffer: Some(image_buffer),
        }
    }

    pub fn image_buffer(&self) -> Option<&PixelBuffer> {
        self.image_buffer.as_ref()
    }
}

/// Notice for a sample that was discarded before delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedSample {
    pub sequence: u64,
}
