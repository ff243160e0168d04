//! Audio playback driver
//!
//! Pops units from the jitter buffer and writes them to an output device.
//! Playback rate is whatever the device's blocking write imposes; the
//! remaining-time figure is only reported, never used for timing.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::audio::buffer::{JitterBuffer, PopError};
use crate::config::PlaybackConfig;
use crate::diagnostics::TimestampLog;
use crate::error::AudioError;

/// Sink for interleaved little-endian 16-bit PCM
pub trait AudioOutput {
    /// Write one unit, blocking until the device has room for it
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Block until everything written so far has been played
    fn finish(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Times the device ran out of samples mid-stream
    fn underruns(&self) -> u64 {
        0
    }
}

/// Discards PCM at real-time rate, for running without a sound device
pub struct PacedNullOutput {
    format: PlaybackConfig,
    next_deadline: Option<Instant>,
}

impl PacedNullOutput {
    pub fn new(format: PlaybackConfig) -> Self {
        Self {
            format,
            next_deadline: None,
        }
    }
}

impl AudioOutput for PacedNullOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let now = Instant::now();
        let start = match self.next_deadline {
            Some(deadline) if deadline > now => {
                std::thread::sleep(deadline - now);
                deadline
            }
            _ => now,
        };
        self.next_deadline = Some(start + self.format.duration_of(pcm.len()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        if let Some(deadline) = self.next_deadline.take() {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "device")]
pub use self::cpal_output::CpalOutput;

#[cfg(feature = "device")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::AudioOutput;
    use crate::audio::device::{default_output_device, get_output_device};
    use crate::config::PlaybackConfig;
    use crate::error::AudioError;

    /// Units queued ahead of the device callback
    const PENDING_UNITS: usize = 2;

    /// `finish` gives up if the device makes no progress for this long
    const DRAIN_STALL: Duration = Duration::from_secs(1);

    /// cpal output stream fed one unit at a time
    ///
    /// `cpal::Stream` is not `Send` on every platform, so open this on the
    /// thread that will write to it.
    pub struct CpalOutput {
        tx: Sender<Vec<i16>>,
        errors: Receiver<AudioError>,
        underruns: Arc<AtomicU64>,
        /// Units handed to the callback
        written: u64,
        /// Units the callback has fully copied to the device
        played: Arc<AtomicU64>,
        _stream: cpal::Stream,
    }

    impl CpalOutput {
        pub fn open(format: &PlaybackConfig) -> Result<Self, AudioError> {
            let device = match &format.device {
                Some(name) => get_output_device(name)?,
                None => default_output_device()?,
            };

            let config = cpal::StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(format.frames_per_buffer),
            };

            let (tx, rx) = bounded::<Vec<i16>>(PENDING_UNITS);
            let (error_tx, error_rx) = bounded::<AudioError>(16);
            let underruns = Arc::new(AtomicU64::new(0));
            let underruns_cb = underruns.clone();
            let played = Arc::new(AtomicU64::new(0));
            let played_cb = played.clone();

            let mut pending: Vec<i16> = Vec::new();
            let mut pos = 0usize;

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut starved = false;
                        for slot in data.iter_mut() {
                            while pos >= pending.len() {
                                match rx.try_recv() {
                                    Ok(next) if next.is_empty() => {
                                        played_cb.fetch_add(1, Ordering::Release);
                                    }
                                    Ok(next) => {
                                        pending = next;
                                        pos = 0;
                                    }
                                    Err(_) => break,
                                }
                            }

                            if pos < pending.len() {
                                *slot = pending[pos];
                                pos += 1;
                                if pos == pending.len() {
                                    played_cb.fetch_add(1, Ordering::Release);
                                }
                            } else {
                                *slot = 0;
                                starved = true;
                            }
                        }
                        if starved {
                            underruns_cb.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            tracing::info!(
                "Audio output opened: {}Hz, {} channels, {} frames per buffer",
                format.sample_rate,
                format.channels,
                format.frames_per_buffer
            );

            Ok(Self {
                tx,
                errors: error_rx,
                underruns,
                written: 0,
                played,
                _stream: stream,
            })
        }

    }

    impl AudioOutput for CpalOutput {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            if let Ok(err) = self.errors.try_recv() {
                return Err(err);
            }
            if pcm.len() % 2 != 0 {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{} bytes is not a whole number of 16-bit samples",
                    pcm.len()
                )));
            }

            let samples = pcm
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();

            self.tx.send(samples).map_err(|_| AudioError::OutputClosed)?;
            self.written += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), AudioError> {
            let mut last_played = self.played.load(Ordering::Acquire);
            let mut last_progress = Instant::now();

            while last_played < self.written {
                if let Ok(err) = self.errors.try_recv() {
                    return Err(err);
                }
                std::thread::sleep(Duration::from_millis(5));

                let played = self.played.load(Ordering::Acquire);
                if played > last_played {
                    last_played = played;
                    last_progress = Instant::now();
                } else if last_progress.elapsed() >= DRAIN_STALL {
                    tracing::warn!(
                        "Audio device stopped draining with {} units unplayed",
                        self.written - played
                    );
                    break;
                }
            }
            Ok(())
        }

        fn underruns(&self) -> u64 {
            self.underruns.load(Ordering::Relaxed)
        }
    }
}

/// Why playback stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Every announced unit was played
    Complete,
    /// The buffer stayed empty past the stall timeout
    Stalled,
    Cancelled,
}

/// Summary of one playback run
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub buffered_at_start: usize,
    pub units_played: u64,
    pub bytes_played: u64,
    /// Device callbacks that ran short of samples
    pub underruns: u64,
    pub end: PlaybackEnd,
}

/// Drives one audio session from the jitter buffer to an output
pub struct AudioPlayback<O: AudioOutput> {
    output: O,
    format: PlaybackConfig,
    stall_timeout: Duration,
    poll: Duration,
    timestamps: Option<TimestampLog>,
}

impl<O: AudioOutput> AudioPlayback<O> {
    pub fn new(output: O, format: PlaybackConfig) -> Self {
        Self {
            output,
            format,
            stall_timeout: Duration::from_secs(3),
            poll: Duration::from_millis(crate::constants::STOP_POLL_MS),
            timestamps: None,
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration, poll: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    pub fn with_timestamps(mut self, log: Option<TimestampLog>) -> Self {
        self.timestamps = log;
        self
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Play until `expected_units` have been written, the stream stalls, or
    /// `cancel` fires. `chunk_frames` only feeds the remaining-time estimate.
    pub fn run(
        &mut self,
        buffer: &JitterBuffer,
        expected_units: u64,
        chunk_frames: usize,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport, AudioError> {
        let buffered_at_start = buffer.len();
        let chunk_bytes = chunk_frames * self.format.bytes_per_frame();
        let mut remaining = Duration::from_secs_f64(
            self.format.duration_of(chunk_bytes).as_secs_f64() * expected_units as f64,
        );

        tracing::info!(
            "Now playing: {} units, {} buffered, {:.1}s of audio",
            expected_units,
            buffered_at_start,
            remaining.as_secs_f64()
        );

        let mut units_played = 0u64;
        let mut bytes_played = 0u64;
        let mut idle = Duration::ZERO;
        let mut end = PlaybackEnd::Complete;

        while units_played < expected_units {
            if cancel.is_cancelled() {
                end = PlaybackEnd::Cancelled;
                break;
            }

            let unit = match buffer.pop_timeout(self.poll) {
                Ok(unit) => unit,
                Err(PopError::Timeout) => {
                    idle += self.poll;
                    if idle < self.stall_timeout {
                        continue;
                    }
                    tracing::warn!(
                        "Audio stalled: {} of {} units never arrived",
                        expected_units - units_played,
                        expected_units
                    );
                    end = PlaybackEnd::Stalled;
                    break;
                }
                Err(PopError::Ended) => {
                    tracing::warn!(
                        "Audio receiver stopped with {} of {} units missing",
                        expected_units - units_played,
                        expected_units
                    );
                    end = PlaybackEnd::Stalled;
                    break;
                }
            };
            idle = Duration::ZERO;

            self.output.write(unit.payload())?;
            units_played += 1;
            bytes_played += unit.len() as u64;
            remaining = remaining.saturating_sub(self.format.duration_of(unit.len()));

            if let Some(log) = self.timestamps.as_mut() {
                if !unit.is_empty() {
                    if let Err(e) = log.record(units_played) {
                        tracing::warn!("Disabling timestamp log {}: {}", log.path().display(), e);
                        self.timestamps = None;
                    }
                }
            }

            tracing::debug!(
                "Queue size while playing: {}, time remaining: {}s",
                buffer.len(),
                remaining.as_secs()
            );
        }

        // Let the device play out what it has queued
        if end != PlaybackEnd::Cancelled {
            self.output.finish()?;
        }
        let underruns = self.output.underruns();

        tracing::info!(
            "Audio playback ended ({:?}): {} units, {} bytes, {} underruns",
            end,
            units_played,
            bytes_played,
            underruns
        );

        Ok(PlaybackReport {
            buffered_at_start,
            units_played,
            bytes_played,
            underruns,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaUnit;

    #[derive(Default)]
    struct RecordingOutput {
        written: Vec<u8>,
        writes: usize,
        /// `writes` at each `finish` call
        finished_after: Vec<usize>,
    }

    impl AudioOutput for RecordingOutput {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            self.written.extend_from_slice(pcm);
            self.writes += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), AudioError> {
            self.finished_after.push(self.writes);
            Ok(())
        }

        fn underruns(&self) -> u64 {
            2
        }
    }

    fn format() -> PlaybackConfig {
        PlaybackConfig::default()
    }

    #[test]
    fn test_plays_all_units_in_order() {
        let (producer, buffer) = JitterBuffer::bounded(8);
        for n in 0..5u8 {
            producer.push(MediaUnit::audio(vec![n; 4])).unwrap();
        }

        let mut playback = AudioPlayback::new(RecordingOutput::default(), format());
        let report = playback
            .run(&buffer, 5, 1, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.end, PlaybackEnd::Complete);
        assert_eq!(report.buffered_at_start, 5);
        assert_eq!(report.units_played, 5);
        assert_eq!(report.bytes_played, 20);
        assert_eq!(report.underruns, 2);

        let output = playback.into_output();
        assert_eq!(output.writes, 5);
        assert_eq!(output.finished_after, vec![5]);
        assert_eq!(&output.written[..8], &[0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_stalls_on_missing_units() {
        let (producer, buffer) = JitterBuffer::bounded(8);
        producer.push(MediaUnit::audio(vec![0u8; 4])).unwrap();

        let mut playback = AudioPlayback::new(RecordingOutput::default(), format())
            .with_stall_timeout(Duration::from_millis(40), Duration::from_millis(10));
        let report = playback
            .run(&buffer, 3, 1, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.end, PlaybackEnd::Stalled);
        assert_eq!(report.units_played, 1);
        // The unit that did arrive is still played out
        assert_eq!(playback.output().finished_after, vec![1]);
        drop(producer);
    }

    #[test]
    fn test_receiver_gone_ends_playback_after_drain() {
        let (producer, buffer) = JitterBuffer::bounded(8);
        producer.push(MediaUnit::audio(vec![0u8; 4])).unwrap();
        drop(producer);

        let mut playback = AudioPlayback::new(RecordingOutput::default(), format())
            .with_stall_timeout(Duration::from_secs(30), Duration::from_millis(10));
        let start = Instant::now();
        let report = playback
            .run(&buffer, 3, 1, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.end, PlaybackEnd::Stalled);
        assert_eq!(report.units_played, 1);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(playback.output().finished_after, vec![1]);
    }

    #[test]
    fn test_cancel_stops_playback() {
        let (_producer, buffer) = JitterBuffer::bounded(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut playback = AudioPlayback::new(RecordingOutput::default(), format());
        let report = playback.run(&buffer, 10, 1, &cancel).unwrap();

        assert_eq!(report.end, PlaybackEnd::Cancelled);
        assert_eq!(report.units_played, 0);
        assert!(playback.output().finished_after.is_empty());
    }

    #[test]
    fn test_timestamps_recorded_per_unit() {
        let dir = tempfile::tempdir().unwrap();
        let log = TimestampLog::open_in(dir.path(), crate::media::MediaKind::Audio).unwrap();

        let (producer, buffer) = JitterBuffer::bounded(4);
        producer.push(MediaUnit::audio(vec![1u8; 4])).unwrap();
        producer.push(MediaUnit::audio(vec![2u8; 4])).unwrap();

        let mut playback =
            AudioPlayback::new(RecordingOutput::default(), format()).with_timestamps(Some(log));
        playback.run(&buffer, 2, 1, &CancellationToken::new()).unwrap();

        let text = std::fs::read_to_string(dir.path().join("audiotest.txt")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_paced_null_output_keeps_real_time() {
        let mut output = PacedNullOutput::new(format());
        // 441 stereo frames = 10ms
        let unit = vec![0u8; 441 * 4];
        let start = Instant::now();
        for _ in 0..5 {
            output.write(&unit).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(40));

        // The last unit is only played out once finish returns
        output.finish().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
