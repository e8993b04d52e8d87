//! Camera capture
//!
//! Device discovery, the nokhwa-backed capture handle and the overlay that is
//! burned into every frame.

pub mod enumerator;
pub mod overlay;
pub mod traits;
pub mod webcam;

#[cfg(test)]
pub(crate) mod testing;

pub use enumerator::{scan, DEFAULT_SCAN_LIMIT};
pub use traits::{
    default_camera_name, CameraDevice, CaptureBackend, CaptureError, CaptureHandle, Frame,
    Resolution,
};
pub use webcam::NokhwaBackend;
