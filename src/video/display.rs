//! Display side of video playback
//!
//! The surface that shows frames is external; it is reached through
//! [`FrameSink`], which receives every decoded frame together with the current
//! frames-per-second figure to overlay.

use image::Rgb;
use std::path::PathBuf;
use std::time::Instant;

use crate::error::MediaError;
use crate::video::source::RawFrame;

/// Consumer of decoded frames
pub trait FrameSink: Send {
    fn render(&mut self, frame: &RawFrame, fps: u32) -> Result<(), MediaError>;
}

/// Throughput meter recomputed once every `window` frames
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: u32,
    count: u32,
    window_start: Instant,
    fps: u32,
}

impl FpsMeter {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            count: 0,
            window_start: Instant::now(),
            fps: 0,
        }
    }

    /// Count one frame; returns the latest figure
    pub fn tick(&mut self) -> u32 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> u32 {
        self.count += 1;
        if self.count >= self.window {
            let elapsed = now.duration_since(self.window_start).as_secs_f64();
            if elapsed > 0.0 {
                self.fps = (f64::from(self.window) / elapsed).round() as u32;
            }
            self.window_start = now;
            self.count = 0;
        }
        self.fps
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// Sink that only traces frames, for headless runs
#[derive(Debug, Default)]
pub struct LogDisplay {
    frames: u64,
}

impl FrameSink for LogDisplay {
    fn render(&mut self, frame: &RawFrame, fps: u32) -> Result<(), MediaError> {
        self.frames += 1;
        tracing::debug!(
            "Frame {} ({}x{}) FPS: {}",
            self.frames,
            frame.width(),
            frame.height(),
            fps
        );
        Ok(())
    }
}

/// Top-left corner of the FPS label
const LABEL_ORIGIN: (u32, u32) = (10, 25);
/// Pixels per font cell
const LABEL_SCALE: u32 = 3;
const LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 3x5 glyph rows, most significant of the low three bits on the left
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        ' ' => [0; 5],
        _ => return None,
    })
}

/// Draw `FPS: <fps>` in red near the top-left corner, clipped to the frame
pub fn overlay_fps(frame: &mut RawFrame, fps: u32) {
    let (mut x, y) = LABEL_ORIGIN;
    for c in format!("FPS: {}", fps).chars() {
        let Some(rows) = glyph(c) else { continue };
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..3u32 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let px = x + col * LABEL_SCALE;
                let py = y + row as u32 * LABEL_SCALE;
                for dy in 0..LABEL_SCALE {
                    for dx in 0..LABEL_SCALE {
                        if px + dx < frame.width() && py + dy < frame.height() {
                            frame.put_pixel(px + dx, py + dy, LABEL_COLOR);
                        }
                    }
                }
            }
        }
        // One blank cell between glyphs
        x += 4 * LABEL_SCALE;
    }
}

/// Writes every frame, with its FPS label, to a numbered PNG file
pub struct FrameDumpSink {
    dir: PathBuf,
    frames: u64,
}

impl FrameDumpSink {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, frames: 0 })
    }
}

impl FrameSink for FrameDumpSink {
    fn render(&mut self, frame: &RawFrame, fps: u32) -> Result<(), MediaError> {
        self.frames += 1;
        let mut frame = frame.clone();
        overlay_fps(&mut frame, fps);
        frame.save(self.dir.join(format!("frame_{:06}.png", self.frames)))?;
        Ok(())
    }
}
