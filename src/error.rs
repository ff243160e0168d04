//! Error types for the media streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media source and frame codec errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Session handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("No size reply from {0}")]
    NoReply(String),

    #[error("Malformed size reply: {0:?}")]
    Malformed(String),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output closed")]
    OutputClosed,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
