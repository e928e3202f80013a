pub mod capture;
pub mod controller;
pub mod render;
pub mod vision;

pub use controller::{CaptureController, ControllerState, CAPTURE_PRESET};
