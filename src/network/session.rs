//! Per-handshake session bookkeeping

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::media::MediaKind;

/// One handshake-to-completion transfer between a server and a viewer
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    kind: MediaKind,
    peer: SocketAddr,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Session {
    pub fn new(kind: MediaKind, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            peer,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Address every unit of this session is sent to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn finish(&self, units_sent: u64, bytes_sent: u64, end: SessionEnd) -> SessionReport {
        let report = SessionReport {
            session_id: self.id,
            kind: self.kind,
            peer: self.peer,
            started_at: self.started_at,
            units_sent,
            bytes_sent,
            elapsed: self.elapsed(),
            end,
        };
        tracing::info!(
            "{} session {} with {} ended ({:?}): {} units, {:.1} KB in {:.2}s",
            report.kind,
            report.session_id,
            report.peer,
            report.end,
            report.units_sent,
            report.bytes_sent as f64 / 1024.0,
            report.elapsed.as_secs_f64()
        );
        report
    }
}

/// Why a streaming session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEnd {
    /// Every unit was sent (audio) or the source ran dry (video)
    Completed,
    Cancelled,
}

/// Outcome of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub kind: MediaKind,
    pub peer: SocketAddr,
    pub started_at: DateTime<Utc>,
    pub units_sent: u64,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub end: SessionEnd,
}
