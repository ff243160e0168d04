//! Video channel: frame sources, frame codec and display

pub mod codec;
pub mod display;
pub mod source;

pub use codec::{FrameDecoder, FrameEncoder};
pub use display::{overlay_fps, FpsMeter, FrameDumpSink, FrameSink, LogDisplay};
pub use source::{FrameList, FrameSource, ImageSequence, RawFrame, VideoMeta};
