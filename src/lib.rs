//! # LAN Media Streamer
//!
//! Pre-recorded audio and video delivered to a single viewer over UDP. Each
//! medium runs as an independent channel with its own handshake, chunking and
//! pacing.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                SERVER                                     │
//! │  ┌──────────────────────┐              ┌──────────────────────┐          │
//! │  │ WAV file             │              │ Frame source         │          │
//! │  │ (audio::source)      │              │ (video::source)      │          │
//! │  └──────────┬───────────┘              └──────────┬───────────┘          │
//! │             │ fixed-size PCM chunks               │ raw frames, lazily   │
//! │             ▼                                     ▼                      │
//! │  ┌──────────────────────┐              ┌──────────────────────┐          │
//! │  │ Audio channel server │              │ Video channel server │          │
//! │  │ :9633                │              │ :9999                │          │
//! │  │ reply "<count>",     │              │ resize, JPEG q80,    │          │
//! │  │ then chunk + 1ms gap │              │ base64, send inline  │          │
//! │  └──────────┬───────────┘              └──────────┬───────────┘          │
//! └─────────────┼─────────────────────────────────────┼──────────────────────┘
//!               │ UDP, no sequence numbers            │ UDP, one frame/datagram
//!               ▼                                     ▼
//! ┌─────────────┼─────────────────────────────────────┼──────────────────────┐
//! │  ┌──────────┴───────────┐              ┌──────────┴───────────┐          │
//! │  │ Audio channel client │              │ Video channel client │          │
//! │  │ receive thread       │              │ decode + FPS + sink  │          │
//! │  └──────────┬───────────┘              └──────────────────────┘          │
//! │             ▼                                                            │
//! │  ┌──────────────────────┐   ┌──────────────────────┐                     │
//! │  │ Jitter buffer (FIFO) │──▶│ Audio playback       │──▶ output device    │
//! │  └──────────────────────┘   └──────────────────────┘                     │
//! │                                                                          │
//! │  Heartbeat broadcaster ── "SYNC_MARKER" every second ──▶ both servers    │
//! │                                CLIENT                                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod media;
pub mod network;
pub mod video;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Well-known audio channel port
    pub const DEFAULT_AUDIO_PORT: u16 = 9633;

    /// Well-known video channel port
    pub const DEFAULT_VIDEO_PORT: u16 = 9999;

    /// Receive buffer size and maximum datagram read size
    pub const RECV_BUFFER_SIZE: usize = 65536;

    /// Largest payload a single IPv4 UDP datagram can carry
    pub const MAX_UDP_PAYLOAD: usize = 65507;

    /// Audio frames per chunk (40ms at 44.1kHz)
    pub const DEFAULT_CHUNK_FRAMES: usize = 1764;

    /// Delay after every audio chunk sent
    pub const DEFAULT_SEND_INTERVAL_MS: u64 = 1;

    /// Width every video frame is resized to before encoding
    pub const DEFAULT_TARGET_WIDTH: u32 = 400;

    /// JPEG quality factor for video frames
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;

    /// Frames between FPS recomputations
    pub const FPS_WINDOW_FRAMES: u32 = 20;

    /// Upper bound on how long a stop request may go unnoticed
    pub const STOP_POLL_MS: u64 = 50;

    /// Cap on the unit count a size reply may announce (about 3 hours of 40ms chunks)
    pub const MAX_EXPECTED_UNITS: u64 = 262_144;

    /// Time the audio client lets the jitter buffer fill before playing
    pub const DEFAULT_WARMUP_MS: u64 = 5000;

    /// Heartbeat period
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Heartbeat payload
    pub const SYNC_MARKER: &[u8] = b"SYNC_MARKER";

    /// Playback sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Playback channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Output device buffer, in frames
    pub const PLAYBACK_FRAMES_PER_BUFFER: u32 = 419;
}
