//! Frame codec for the video channel
//!
//! Wire payload = base64(JPEG(frame resized to the target width)). Encoding is
//! kept apart from transmission so senders can batch or pace independently.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::ImageFormat;

use crate::error::MediaError;
use crate::video::source::RawFrame;

/// Height that keeps the aspect ratio at `target_width`
pub fn target_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return height.max(1);
    }
    let scaled = u64::from(height) * u64::from(target_width) / u64::from(width);
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

/// Resizes, compresses and text-encodes frames
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    target_width: u32,
    quality: u8,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl FrameEncoder {
    pub fn new(target_width: u32, quality: u8) -> Self {
        Self {
            target_width: target_width.max(1),
            quality: quality.clamp(1, 100),
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Scale to the target width, preserving aspect ratio
    pub fn resize(&self, frame: &RawFrame) -> RawFrame {
        if frame.width() == self.target_width {
            return frame.clone();
        }
        let height = target_height(frame.width(), frame.height(), self.target_width);
        imageops::resize(frame, self.target_width, height, FilterType::Triangle)
    }

    /// JPEG bytes of an already-resized frame
    pub fn compress(&self, frame: &RawFrame) -> Result<Vec<u8>, MediaError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(frame)?;
        Ok(jpeg)
    }

    /// Full pipeline: resize, compress, base64
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, MediaError> {
        let jpeg = self.compress(&self.resize(frame))?;
        let payload = Bytes::from(STANDARD.encode(jpeg));

        self.frames_encoded += 1;
        self.bytes_produced += payload.len() as u64;

        Ok(payload)
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

/// Reverses [`FrameEncoder::encode`]
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, payload: &[u8]) -> Result<RawFrame, MediaError> {
        let jpeg = STANDARD
            .decode(payload.trim_ascii())
            .map_err(|e| MediaError::DecodingFailed(format!("base64: {}", e)))?;
        if jpeg.is_empty() {
            return Err(MediaError::DecodingFailed("empty frame payload".into()));
        }
        let frame = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?;
        Ok(frame.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_target_height_preserves_aspect() {
        assert_eq!(target_height(1920, 1080, 400), 225);
        assert_eq!(target_height(640, 480, 400), 300);
        assert_eq!(target_height(4000, 1, 400), 1);
    }

    #[test]
    fn test_encode_resizes_and_decodes() {
        let frame = RawFrame::from_pixel(64, 48, Rgb([200, 40, 40]));
        let mut encoder = FrameEncoder::new(32, 80);

        let payload = encoder.encode(&frame).unwrap();
        assert!(payload.iter().all(|b| b.is_ascii()));

        let decoded = FrameDecoder::new().decode(&payload).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
        let px = decoded.get_pixel(16, 12);
        assert!(px[0] > 150 && px[1] < 90);

        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let decoder = FrameDecoder::new();
        assert!(decoder.decode(b"").is_err());
        assert!(decoder.decode(b"not base64 at all!").is_err());
        // valid base64, not a JPEG
        assert!(decoder.decode(b"aGVsbG8=").is_err());
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let frame = RawFrame::from_fn(128, 96, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, ((x ^ y) * 3) as u8]));
        let high = FrameEncoder::new(128, 95).compress(&frame).unwrap();
        let low = FrameEncoder::new(128, 20).compress(&frame).unwrap();
        assert!(low.len() < high.len());
    }
}
