//! Application configuration
//!
//! Every server, client and broadcaster is constructed from one of these
//! sections; nothing reads ports or addresses from global state.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::buffer::JitterCapacity;
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration, loadable from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioChannelConfig,
    pub video: VideoChannelConfig,
    pub client: ClientConfig,
    pub heartbeat: HeartbeatConfig,
    pub playback: PlaybackConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-media-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the platform default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(default) if default.exists() => {
                tracing::info!("Loading config from {}", default.display());
                Self::load(&default)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Reject settings no channel can run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.chunk_frames == 0 {
            return Err(Error::Config("audio.chunk_frames must be positive".into()));
        }
        if self.video.target_width == 0 {
            return Err(Error::Config("video.target_width must be positive".into()));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(Error::Config(format!(
                "video.jpeg_quality must be within 1..=100, got {}",
                self.video.jpeg_quality
            )));
        }
        if self.video.fps_window == 0 || self.client.fps_window == 0 {
            return Err(Error::Config("fps_window must be positive".into()));
        }
        if self.client.max_expected_units == 0 {
            return Err(Error::Config("client.max_expected_units must be positive".into()));
        }
        if let JitterCapacity::Units(0) = self.client.jitter_capacity {
            return Err(Error::Config("client.jitter_capacity must hold at least one unit".into()));
        }
        if self.playback.channels == 0 || self.playback.sample_rate == 0 {
            return Err(Error::Config("playback format must be non-empty".into()));
        }
        Ok(())
    }
}

/// Audio channel server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioChannelConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub recv_buffer_size: usize,
    /// Frames (samples per channel) in one chunk
    pub chunk_frames: usize,
    /// Pause after every chunk sent
    pub send_interval_ms: u64,
}

impl Default for AudioChannelConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_AUDIO_PORT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
        }
    }
}

impl AudioChannelConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// Video channel server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoChannelConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub recv_buffer_size: usize,
    pub target_width: u32,
    pub jpeg_quality: u8,
    /// Pause after every frame sent; 0 sends as fast as frames are encoded
    pub frame_interval_ms: u64,
    /// Frames between server-side FPS recomputations
    pub fps_window: u32,
    /// Nominal rate of image-sequence sources
    pub source_frame_rate: f64,
}

impl Default for VideoChannelConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_VIDEO_PORT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            target_width: DEFAULT_TARGET_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval_ms: STOP_POLL_MS,
            fps_window: FPS_WINDOW_FRAMES,
            source_frame_rate: 30.0,
        }
    }
}

impl VideoChannelConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        (self.frame_interval_ms > 0).then(|| Duration::from_millis(self.frame_interval_ms))
    }
}

/// Viewer-side settings for both channel clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: IpAddr,
    pub audio_port: u16,
    pub video_port: u16,
    pub recv_buffer_size: usize,
    /// Bytes sent to open a session; servers accept any content
    pub handshake_payload: String,
    pub handshake_timeout_ms: u64,
    /// Largest unit count a size reply may announce; larger replies are rejected
    pub max_expected_units: u64,
    pub warmup_ms: u64,
    pub jitter_capacity: JitterCapacity,
    /// Give up on missing audio units after the buffer stays empty this long
    pub stall_timeout_ms: u64,
    pub stop_poll_ms: u64,
    pub fps_window: u32,
    /// Frames of audio per chunk, used only for the remaining-time estimate
    pub chunk_frames: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            audio_port: DEFAULT_AUDIO_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            handshake_payload: "Hello".to_string(),
            handshake_timeout_ms: 5000,
            max_expected_units: MAX_EXPECTED_UNITS,
            warmup_ms: DEFAULT_WARMUP_MS,
            jitter_capacity: JitterCapacity::WholeStream,
            stall_timeout_ms: 3000,
            stop_poll_ms: STOP_POLL_MS,
            fps_window: FPS_WINDOW_FRAMES,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl ClientConfig {
    pub fn audio_server(&self) -> SocketAddr {
        SocketAddr::new(self.server_host, self.audio_port)
    }

    pub fn video_server(&self) -> SocketAddr {
        SocketAddr::new(self.server_host, self.video_port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms.max(1))
    }
}

/// Heartbeat broadcaster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub marker: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: HEARTBEAT_INTERVAL_MS,
            marker: String::from_utf8_lossy(SYNC_MARKER).into_owned(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Audio output format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
    /// Output device name; `None` picks the host default
    pub device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_buffer: PLAYBACK_FRAMES_PER_BUFFER,
            device: None,
        }
    }
}

impl PlaybackConfig {
    /// Bytes in one interleaved 16-bit frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    /// Playing time of `bytes` of PCM in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Optional local diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Directory receiving per-unit timestamp files; disabled when unset
    pub timestamp_dir: Option<PathBuf>,
}
