//! Media units shared by both channels

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which channel a unit or session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// One atomic transmissible piece of media: a PCM chunk or one encoded frame.
///
/// Units carry no sequence number. Their position is the order in which they
/// were produced, and on the receiving side the order in which they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    kind: MediaKind,
    payload: Bytes,
}

impl MediaUnit {
    pub fn new(kind: MediaKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn audio(payload: impl Into<Bytes>) -> Self {
        Self::new(MediaKind::Audio, payload)
    }

    pub fn video(payload: impl Into<Bytes>) -> Self {
        Self::new(MediaKind::Video, payload)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
