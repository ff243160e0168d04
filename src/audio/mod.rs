//! Audio channel: source chunking, jitter buffering and playback

pub mod buffer;
#[cfg(feature = "device")]
pub mod device;
pub mod playback;
pub mod source;

pub use buffer::{BufferClosed, JitterBuffer, JitterBufferStats, JitterCapacity, JitterProducer, PopError, PushError};
pub use playback::{AudioOutput, AudioPlayback, PacedNullOutput, PlaybackEnd, PlaybackReport};
#[cfg(feature = "device")]
pub use playback::CpalOutput;
pub use source::{AudioTrack, PcmSpec};
