//! Video side of the media source reader
//!
//! Frames are pulled one at a time; nothing is pre-materialised, so a source
//! can only be streamed once.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::MediaError;

/// Decoded 8-bit RGB frame
pub type RawFrame = image::RgbImage;

/// Properties reported by a frame source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMeta {
    pub frame_rate: f64,
    /// `None` when the source cannot tell in advance
    pub frame_count: Option<u64>,
}

impl VideoMeta {
    pub fn duration_secs(&self) -> Option<f64> {
        let count = self.frame_count?;
        (self.frame_rate > 0.0).then(|| (count as f64 / self.frame_rate).floor())
    }
}

/// Ordered producer of raw frames; `Ok(None)` means the source is exhausted
pub trait FrameSource: Send {
    fn meta(&self) -> VideoMeta;

    fn next_frame(&mut self) -> Result<Option<RawFrame>, MediaError>;
}

/// Directory of still images played back in file-name order
pub struct ImageSequence {
    pending: VecDeque<PathBuf>,
    meta: VideoMeta,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

impl ImageSequence {
    pub fn open(dir: impl AsRef<Path>, frame_rate: f64) -> Result<Self, MediaError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            MediaError::UnsupportedFormat(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let meta = VideoMeta {
            frame_rate,
            frame_count: Some(paths.len() as u64),
        };

        tracing::info!(
            "Video source {}: {} frames at {} fps",
            dir.display(),
            paths.len(),
            frame_rate
        );

        Ok(Self {
            pending: paths.into(),
            meta,
        })
    }
}

impl FrameSource for ImageSequence {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, MediaError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let frame = image::open(&path)?.to_rgb8();
        Ok(Some(frame))
    }
}

/// Frames already held in memory
pub struct FrameList {
    frames: VecDeque<RawFrame>,
    meta: VideoMeta,
}

impl FrameList {
    pub fn new(frames: Vec<RawFrame>, frame_rate: f64) -> Self {
        let meta = VideoMeta {
            frame_rate,
            frame_count: Some(frames.len() as u64),
        };
        Self {
            frames: frames.into(),
            meta,
        }
    }
}

impl FrameSource for FrameList {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, MediaError> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_image_sequence_order_and_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RawFrame::from_pixel(4, 2, Rgb([shade, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequence::open(dir.path(), 25.0).unwrap();
        assert_eq!(source.meta().frame_count, Some(3));

        let shades: Vec<u8> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|f| f.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_list_meta() {
        let frames = vec![RawFrame::new(2, 2); 60];
        let source = FrameList::new(frames, 30.0);
        assert_eq!(source.meta().duration_secs(), Some(2.0));
    }
}
