//! Camera discovery by index probing

use super::traits::{CameraDevice, CaptureBackend};

/// Number of indices probed by a normal refresh
pub const DEFAULT_SCAN_LIMIT: u32 = 8;

/// Probe indices `0..max_index` and return the ones that deliver a frame.
///
/// Each probe is one open plus one read. The probe handle is released before
/// moving on, whatever happened, so the real open later on finds the device
/// free. There are no retries: a device that hiccups during the probe is
/// treated as absent until the next refresh.
pub fn scan(backend: &dyn CaptureBackend, max_index: u32) -> Vec<CameraDevice> {
    let mut cameras = Vec::new();

    for index in 0..max_index {
        let mut handle = match backend.open(index) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::trace!("Probe open failed for index {}: {}", index, e);
                continue;
            }
        };

        let live = match handle.read_frame() {
            Ok(frame) => {
                tracing::debug!(
                    "Camera {} answered probe ({}x{})",
                    index,
                    frame.width,
                    frame.height
                );
                true
            }
            Err(e) => {
                tracing::debug!("Camera {} opened but probe read failed: {}", index, e);
                false
            }
        };

        handle.release();

        if live {
            cameras.push(CameraDevice::new(index));
        }
    }

    tracing::info!("Scan of {} indices found {} camera(s)", max_index, cameras.len());
    cameras
}
