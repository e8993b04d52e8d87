//! In-memory capture backend for tests

use super::traits::{CaptureBackend, CaptureError, CaptureHandle, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Behavior of one fake device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub opens: bool,
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    /// Shared switch so a test can make reads fail mid-run
    pub reads_fail: Arc<AtomicBool>,
    /// How long each read blocks, to mimic a sluggish device
    pub read_delay: Duration,
}

impl FakeDevice {
    pub fn live(width: u32, height: u32) -> Self {
        Self {
            opens: true,
            width,
            height,
            fps: Some(30),
            reads_fail: Arc::new(AtomicBool::new(false)),
            read_delay: Duration::ZERO,
        }
    }

    /// Opens fine but never yields a frame
    pub fn mute() -> Self {
        let device = Self::live(4, 4);
        device.reads_fail.store(true, Ordering::SeqCst);
        device
    }

    pub fn busy() -> Self {
        Self {
            opens: false,
            ..Self::live(4, 4)
        }
    }

    pub fn with_fps(mut self, fps: Option<u32>) -> Self {
        self.fps = fps;
        self
    }

    pub fn slow(mut self, read_delay: Duration) -> Self {
        self.read_delay = read_delay;
        self
    }
}

/// Backend over a fixed table of fake devices
#[derive(Default)]
pub struct FakeBackend {
    devices: Mutex<HashMap<u32, FakeDevice>>,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, index: u32, device: FakeDevice) -> Self {
        self.devices.lock().insert(index, device);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeBackend {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let device = self
            .devices
            .lock()
            .get(&index)
            .cloned()
            .filter(|d| d.opens)
            .ok_or_else(|| CaptureError::OpenFailed {
                index,
                reason: "no such device".to_string(),
            })?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            device,
            released: self.released.clone(),
            is_released: false,
            frames_read: 0,
        }))
    }
}

pub struct FakeHandle {
    device: FakeDevice,
    released: Arc<AtomicUsize>,
    is_released: bool,
    frames_read: u64,
}

impl CaptureHandle for FakeHandle {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.is_released {
            return Err(CaptureError::Released);
        }
        if !self.device.read_delay.is_zero() {
            std::thread::sleep(self.device.read_delay);
        }
        if self.device.reads_fail.load(Ordering::SeqCst) {
            return Err(CaptureError::ReadFailed("device busy".to_string()));
        }
        self.frames_read += 1;
        let shade = (self.frames_read % 200) as u8;
        Ok(Frame::solid(
            self.device.width,
            self.device.height,
            [shade, shade, shade],
        ))
    }

    fn reported_fps(&self) -> Option<u32> {
        self.device.fps
    }

    fn release(&mut self) {
        if !self.is_released {
            self.is_released = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.release();
    }
}
