//! MP4 chunk writer backed by an FFmpeg subprocess
//!
//! Raw rgb24 frames are piped to `ffmpeg` on stdin and encoded to H.264.
//! The encoder is spawned on the first frame, once the frame size and rate
//! are known.

use super::sink::{
    remove_empty_chunk, ChunkInfo, ChunkSink, ChunkSinkFactory, RecordingError, RecordingResult,
};
use crate::capture::{Frame, Resolution};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Creates [`FfmpegChunkWriter`]s
#[derive(Debug, Clone)]
pub struct FfmpegSinkFactory {
    pub preset: &'static str,
    pub crf: u8,
}

impl Default for FfmpegSinkFactory {
    fn default() -> Self {
        Self {
            preset: "veryfast",
            crf: 23,
        }
    }
}

impl ChunkSinkFactory for FfmpegSinkFactory {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn preflight(&self) -> RecordingResult<()> {
        if Command::new("ffmpeg").arg("-version").output().is_err() {
            return Err(RecordingError::Encoder(
                "FFmpeg not found. Install FFmpeg or switch recording_format to y4m".to_string(),
            ));
        }
        Ok(())
    }

    fn create(&self, path: &Path) -> RecordingResult<Box<dyn ChunkSink>> {
        // reserve the name now; ffmpeg overwrites it on the first frame
        OpenOptions::new().write(true).create_new(true).open(path)?;

        Ok(Box::new(FfmpegChunkWriter {
            path: path.to_path_buf(),
            preset: self.preset,
            crf: self.crf,
            encoder: None,
            resolution: None,
            frames: 0,
        }))
    }
}

struct Encoder {
    process: Child,
    stdin: ChildStdin,
}

/// One MP4 chunk being encoded
pub struct FfmpegChunkWriter {
    path: PathBuf,
    preset: &'static str,
    crf: u8,
    encoder: Option<Encoder>,
    resolution: Option<Resolution>,
    frames: u64,
}

impl FfmpegChunkWriter {
    fn spawn(&self, resolution: Resolution, fps: u32) -> RecordingResult<Encoder> {
        let args = encoder_args(&self.path, resolution, fps, self.preset, self.crf);
        tracing::info!("Starting FFmpeg chunk encoder: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecordingError::Encoder(format!("Failed to start FFmpeg: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| RecordingError::Encoder("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Encoder { process, stdin })
    }
}

impl ChunkSink for FfmpegChunkWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame, fps: u32) -> RecordingResult<()> {
        let actual = frame.resolution();
        match self.resolution {
            Some(expected) if expected != actual => {
                return Err(RecordingError::FrameSizeChanged { expected, actual });
            }
            Some(_) => {}
            None => {
                self.encoder = Some(self.spawn(actual, fps)?);
                self.resolution = Some(actual);
            }
        }

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| RecordingError::Encoder("Encoder is not running".to_string()))?;
        encoder
            .stdin
            .write_all(&frame.data)
            .map_err(|e| RecordingError::Encoder(format!("Failed to write frame: {}", e)))?;

        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RecordingResult<ChunkInfo> {
        if let Some(Encoder { process, stdin }) = self.encoder.take() {
            // EOF tells ffmpeg to flush and write the moov atom
            drop(stdin);

            let output = process
                .wait_with_output()
                .map_err(|e| RecordingError::Encoder(format!("Failed to wait for FFmpeg: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(RecordingError::Encoder(format!(
                    "FFmpeg exited with error: {}",
                    stderr.trim()
                )));
            }
        }

        if self.frames == 0 {
            remove_empty_chunk(&self.path)?;
        } else {
            tracing::info!("Chunk {:?} finished: {} frames", self.path, self.frames);
        }
        Ok(ChunkInfo {
            path: self.path.clone(),
            frames: self.frames,
        })
    }
}

impl Drop for FfmpegChunkWriter {
    fn drop(&mut self) {
        if let Some(Encoder { mut process, stdin }) = self.encoder.take() {
            drop(stdin);
            let _ = process.wait();
        }
    }
}

/// Command line for encoding rgb24 on stdin into `path`
fn encoder_args(path: &Path, resolution: Resolution, fps: u32, preset: &str, crf: u8) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", resolution.width, resolution.height),
        "-r".to_string(),
        fps.max(1).to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        preset.to_string(),
        "-crf".to_string(),
        crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        path.to_string_lossy().to_string(),
    ]
}
