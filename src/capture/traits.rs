//! Capture trait definitions
//!
//! Platform-agnostic types for camera capture. The engine only talks to
//! devices through [`CaptureBackend`] and [`CaptureHandle`], so feeds can be
//! built and tested without hardware.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capture-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Failed to open camera {index}: {reason}")]
    OpenFailed { index: u32, reason: String },

    #[error("Frame grab failed: {0}")]
    ReadFailed(String),

    #[error("Capture handle already released")]
    Released,
}

/// A camera that answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    /// OS device index
    pub index: u32,

    /// Name assigned at discovery ("Cam {index}")
    pub discovered_name: String,
}

impl CameraDevice {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            discovered_name: default_camera_name(index),
        }
    }
}

/// Positional name for a camera index
pub fn default_camera_name(index: u32) -> String {
    format!("Cam {index}")
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded video frame, packed RGB24 rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Wrap an RGB24 buffer. Returns `None` when the buffer length does not
    /// match the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with one color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let offset = self.offset(x, y)?;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Set a pixel; coordinates outside the frame are ignored
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + Self::BYTES_PER_PIXEL].copy_from_slice(&rgb);
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL)
    }
}

/// Opens camera devices by index
pub trait CaptureBackend: Send + Sync {
    /// Acquire an exclusive handle on a device
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// An open camera
///
/// `release` must be idempotent; dropping a handle releases it as well.
pub trait CaptureHandle: Send {
    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Frame rate reported by the device, if it reports one
    fn reported_fps(&self) -> Option<u32>;

    /// Give the device back to the OS
    fn release(&mut self);
}
