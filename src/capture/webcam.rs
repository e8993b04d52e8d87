//! Webcam capture using nokhwa
//!
//! Each open camera lives on its own worker thread: the nokhwa `Camera` is
//! created, streamed and dropped there, and the handle talks to it over
//! channels. A camera that wedges in `frame()` therefore only blocks the feed
//! that owns it.

use super::traits::{CaptureBackend, CaptureError, CaptureHandle, Frame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Native camera backend (V4L2 / Media Foundation / AVFoundation via nokhwa)
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaBackend;

impl CaptureBackend for NokhwaBackend {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Ok(Box::new(NokhwaHandle::open(index)?))
    }
}

enum Request {
    Read,
    Release,
}

type FrameResult = Result<Frame, CaptureError>;

/// Handle on a camera owned by a worker thread
pub struct NokhwaHandle {
    index: u32,
    requests: Option<Sender<Request>>,
    frames: Receiver<FrameResult>,
    worker: Option<JoinHandle<()>>,
    fps: Option<u32>,
}

impl NokhwaHandle {
    /// Start the worker and wait until the stream is open (or failed to open)
    pub fn open(index: u32) -> Result<Self, CaptureError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || camera_worker(index, request_rx, frame_tx, ready_tx))
            .map_err(|e| CaptureError::OpenFailed {
                index,
                reason: e.to_string(),
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::OpenFailed {
                index,
                reason: "camera worker exited during open".to_string(),
            })
        });

        match ready {
            Ok(fps) => {
                tracing::info!("Camera {} opened (reported fps: {:?})", index, fps);
                Ok(Self {
                    index,
                    requests: Some(request_tx),
                    frames: frame_rx,
                    worker: Some(worker),
                    fps,
                })
            }
            Err(e) => {
                let _ = worker.join();
                Err(e)
            }
        }
    }
}

impl CaptureHandle for NokhwaHandle {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let requests = self.requests.as_ref().ok_or(CaptureError::Released)?;

        requests
            .send(Request::Read)
            .map_err(|_| CaptureError::ReadFailed("camera worker stopped".to_string()))?;

        self.frames
            .recv()
            .map_err(|_| CaptureError::ReadFailed("camera worker stopped".to_string()))?
    }

    fn reported_fps(&self) -> Option<u32> {
        self.fps
    }

    fn release(&mut self) {
        let Some(requests) = self.requests.take() else {
            return;
        };

        let _ = requests.send(Request::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Camera {} worker panicked", self.index);
            }
        }

        tracing::info!("Camera {} released", self.index);
    }
}

impl Drop for NokhwaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn camera_worker(
    index: u32,
    requests: Receiver<Request>,
    frames: Sender<FrameResult>,
    ready: Sender<Result<Option<u32>, CaptureError>>,
) {
    let open_failed = |reason: String| CaptureError::OpenFailed { index, reason };

    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(index), format) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(open_failed(e.to_string())));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(open_failed(e.to_string())));
        return;
    }

    let fps = Some(camera.frame_rate()).filter(|fps| *fps > 0);
    if ready.send(Ok(fps)).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    for request in requests.iter() {
        match request {
            Request::Read => {
                if frames.send(grab_frame(&mut camera)).is_err() {
                    break;
                }
            }
            Request::Release => break,
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera {} stream: {:?}", index, e);
    }
}

fn grab_frame(camera: &mut Camera) -> FrameResult {
    let buffer = camera
        .frame()
        .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;

    let image = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;

    let (width, height) = (image.width(), image.height());
    Frame::from_rgb(width, height, image.into_raw()).ok_or_else(|| {
        CaptureError::ReadFailed(format!("decoded frame does not match {width}x{height}"))
    })
}
