//! Built-in YUV4MPEG2 chunk writer
//!
//! Frames are stored uncompressed as planar 4:4:4 (full range BT.601), so a
//! recording can be made without any external tools. Files are large; use
//! the MP4 sink for long sessions.

use super::sink::{
    remove_empty_chunk, ChunkInfo, ChunkSink, ChunkSinkFactory, RecordingError, RecordingResult,
};
use crate::capture::{Frame, Resolution};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Creates [`Y4mChunkWriter`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mSinkFactory;

impl ChunkSinkFactory for Y4mSinkFactory {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn create(&self, path: &Path) -> RecordingResult<Box<dyn ChunkSink>> {
        Ok(Box::new(Y4mChunkWriter::create(path)?))
    }
}

/// One `.y4m` chunk
pub struct Y4mChunkWriter {
    path: PathBuf,
    out: BufWriter<File>,
    resolution: Option<Resolution>,
    planes: Vec<u8>,
    frames: u64,
}

impl Y4mChunkWriter {
    pub fn create(path: &Path) -> RecordingResult<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            resolution: None,
            planes: Vec::new(),
            frames: 0,
        })
    }
}

impl ChunkSink for Y4mChunkWriter {
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
                self.out.write_all(stream_header(actual, fps).as_bytes())?;
                self.resolution = Some(actual);
            }
        }

        rgb_to_planes(&frame.data, &mut self.planes);
        self.out.write_all(b"FRAME\n")?;
        self.out.write_all(&self.planes)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> RecordingResult<ChunkInfo> {
        let Y4mChunkWriter {
            path,
            mut out,
            frames,
            ..
        } = *self;
        out.flush()?;
        drop(out);

        if frames == 0 {
            remove_empty_chunk(&path)?;
        } else {
            tracing::info!("Chunk {:?} finished: {} frames", path, frames);
        }
        Ok(ChunkInfo { path, frames })
    }
}

fn stream_header(resolution: Resolution, fps: u32) -> String {
    format!(
        "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C444 XCOLORRANGE=FULL\n",
        resolution.width,
        resolution.height,
        fps.max(1)
    )
}

/// Split packed RGB24 into Y, Cb and Cr planes
fn rgb_to_planes(rgb: &[u8], planes: &mut Vec<u8>) {
    let pixels = rgb.len() / Frame::BYTES_PER_PIXEL;
    planes.clear();
    planes.resize(pixels * 3, 0);

    let (y_plane, chroma) = planes.split_at_mut(pixels);
    let (cb_plane, cr_plane) = chroma.split_at_mut(pixels);

    for (i, px) in rgb.chunks_exact(Frame::BYTES_PER_PIXEL).enumerate() {
        let (y, cb, cr) = rgb_to_ycbcr(px[0], px[1], px[2]);
        y_plane[i] = y;
        cb_plane[i] = cb;
        cr_plane[i] = cr;
    }
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (to_byte(y), to_byte(cb), to_byte(cr))
}

fn to_byte(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writes_header_and_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cam0_part001.y4m");

        let mut sink: Box<dyn ChunkSink> = Box::new(Y4mChunkWriter::create(&path).unwrap());
        sink.write_frame(&Frame::solid(4, 2, [255, 255, 255]), 15).unwrap();
        sink.write_frame(&Frame::solid(4, 2, [0, 0, 0]), 15).unwrap();
        let info = sink.finish().unwrap();

        assert_eq!(info.frames, 2);
        let bytes = std::fs::read(&path).unwrap();
        let header = "YUV4MPEG2 W4 H2 F15:1 Ip A1:1 C444 XCOLORRANGE=FULL\n";
        assert!(bytes.starts_with(header.as_bytes()));

        let frame_len = b"FRAME\n".len() + 4 * 2 * 3;
        assert_eq!(bytes.len(), header.len() + 2 * frame_len);

        // first frame is white: Y=255, Cb=Cr=128
        let first = &bytes[header.len() + 6..header.len() + frame_len];
        assert!(first[..8].iter().all(|&y| y == 255));
        assert!(first[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_frame_size_change_is_an_error() {
        let dir = tempdir().unwrap();
        let mut sink = Y4mChunkWriter::create(&dir.path().join("a.y4m")).unwrap();

        sink.write_frame(&Frame::solid(4, 4, [1, 2, 3]), 30).unwrap();
        let err = sink
            .write_frame(&Frame::solid(8, 4, [1, 2, 3]), 30)
            .unwrap_err();

        assert!(matches!(err, RecordingError::FrameSizeChanged { .. }));
    }

    #[test]
    fn test_chunk_without_frames_is_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cam0_part001.y4m");

        let sink: Box<dyn ChunkSink> = Box::new(Y4mChunkWriter::create(&path).unwrap());
        assert!(path.exists());

        let info = sink.finish().unwrap();
        assert_eq!(info.frames, 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.y4m");
        std::fs::write(&path, b"x").unwrap();

        assert!(Y4mChunkWriter::create(&path).is_err());
    }

    #[test]
    fn test_primary_colors_convert() {
        assert_eq!(rgb_to_ycbcr(0, 0, 0), (0, 128, 128));
        let (y, cb, cr) = rgb_to_ycbcr(255, 0, 0);
        assert_eq!(y, 76);
        assert!(cb < 128);
        assert_eq!(cr, 255);
    }
}
