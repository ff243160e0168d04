//! Per-unit timestamp side files
//!
//! Not needed for playback. When enabled, every audio unit played and every
//! video frame decoded with content appends one line recording when it
//! happened, for offline latency comparison between the two channels.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::media::MediaKind;

/// Append-only timestamp log for one channel
pub struct TimestampLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TimestampLog {
    /// Open (or append to) `<dir>/<kind>test.txt`
    pub fn open_in(dir: &Path, kind: MediaKind) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(format!("{}test.txt", kind)))
    }

    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Record that unit `number` (1-based) was handled now
    pub fn record(&mut self, number: u64) -> io::Result<()> {
        let now = Utc::now();
        let seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
        writeln!(self.writer, "for frame : {}   timestamp is:  {:.6}", number, seconds)?;
        self.writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();

        let mut log = TimestampLog::open_in(dir.path(), MediaKind::Audio).unwrap();
        log.record(1).unwrap();
        log.record(2).unwrap();
        drop(log);

        let mut log = TimestampLog::open_in(dir.path(), MediaKind::Audio).unwrap();
        log.record(3).unwrap();

        let text = std::fs::read_to_string(dir.path().join("audiotest.txt")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("for frame : 1   timestamp is:"));
        assert!(lines[2].starts_with("for frame : 3 "));
    }
}
