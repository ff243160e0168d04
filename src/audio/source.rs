//! Audio side of the media source reader
//!
//! Decodes a whole file up front and partitions the raw PCM into consecutive
//! chunks of `chunk_frames` frames. Every session replays the same chunk list.

use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

use crate::error::MediaError;
use crate::media::MediaUnit;

/// Layout of interleaved PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// 16-bit interleaved PCM
    pub fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Bytes in one frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// Number of chunks `total_frames` splits into
pub fn chunk_count(total_frames: usize, chunk_frames: usize) -> usize {
    if chunk_frames == 0 {
        return 0;
    }
    total_frames.div_ceil(chunk_frames)
}

/// Split interleaved PCM into audio units of `chunk_frames` frames each.
///
/// The last unit holds whatever remains and may be shorter. Units share the
/// backing buffer.
pub fn split_pcm(pcm: &Bytes, bytes_per_frame: usize, chunk_frames: usize) -> Vec<MediaUnit> {
    let chunk_bytes = bytes_per_frame * chunk_frames;
    if chunk_bytes == 0 {
        return Vec::new();
    }

    (0..pcm.len())
        .step_by(chunk_bytes)
        .map(|start| {
            let end = (start + chunk_bytes).min(pcm.len());
            MediaUnit::audio(pcm.slice(start..end))
        })
        .collect()
}

/// A decoded audio file, pre-split into transmissible chunks
#[derive(Debug, Clone)]
pub struct AudioTrack {
    spec: PcmSpec,
    chunk_frames: usize,
    total_frames: usize,
    units: Vec<MediaUnit>,
}

impl AudioTrack {
    /// Decode a 16-bit integer PCM WAV file
    pub fn open_wav(path: impl AsRef<Path>, chunk_frames: usize) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let wav = reader.spec();

        if wav.sample_format != hound::SampleFormat::Int || wav.bits_per_sample != 16 {
            return Err(MediaError::UnsupportedFormat(format!(
                "{}: {:?} {}-bit samples, expected 16-bit integer PCM",
                path.display(),
                wav.sample_format,
                wav.bits_per_sample
            )));
        }

        let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
        for sample in reader.samples::<i16>() {
            pcm.extend_from_slice(&sample?.to_le_bytes());
        }

        let track = Self::from_pcm(PcmSpec::s16(wav.sample_rate, wav.channels), pcm, chunk_frames)?;

        tracing::info!(
            "Loaded {}: {} frames, {}Hz, {} channels, {} chunks of {} frames",
            path.display(),
            track.total_frames,
            track.spec.sample_rate,
            track.spec.channels,
            track.unit_count(),
            chunk_frames
        );

        Ok(track)
    }

    /// Build a track from already-decoded interleaved PCM
    pub fn from_pcm(
        spec: PcmSpec,
        pcm: impl Into<Bytes>,
        chunk_frames: usize,
    ) -> Result<Self, MediaError> {
        if chunk_frames == 0 {
            return Err(MediaError::InvalidChunkSize(chunk_frames));
        }

        let bytes_per_frame = spec.bytes_per_frame();
        if bytes_per_frame == 0 {
            return Err(MediaError::UnsupportedFormat(format!("empty frame layout {:?}", spec)));
        }

        let pcm: Bytes = pcm.into();
        if pcm.len() % bytes_per_frame != 0 {
            return Err(MediaError::UnsupportedFormat(format!(
                "{} bytes is not a whole number of {}-byte frames",
                pcm.len(),
                bytes_per_frame
            )));
        }

        let units = split_pcm(&pcm, bytes_per_frame, chunk_frames);

        Ok(Self {
            spec,
            chunk_frames,
            total_frames: pcm.len() / bytes_per_frame,
            units,
        })
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Units in send order
    pub fn units(&self) -> &[MediaUnit] {
        &self.units
    }

    /// Count reported to clients at handshake
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames as f64 / self.spec.sample_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stereo_pcm(frames: usize) -> Vec<u8> {
        (0..frames * 2)
            .flat_map(|i| (i as i16).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_scenario_chunk_count() {
        let track = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), stereo_pcm(88_200), 1764).unwrap();
        assert_eq!(track.unit_count(), 50);
        assert_eq!(track.duration(), Duration::from_secs(2));
        assert!(track.units().iter().all(|u| u.len() == 1764 * 4));
    }

    #[test]
    fn test_short_last_chunk() {
        let track = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), stereo_pcm(1000), 300).unwrap();
        assert_eq!(track.unit_count(), 4);
        assert_eq!(track.units()[3].len(), 100 * 4);
    }

    #[test]
    fn test_rejects_partial_frame() {
        let result = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), vec![0u8; 6], 10);
        assert!(matches!(result, Err(MediaError::UnsupportedFormat(_))));
        assert!(matches!(
            AudioTrack::from_pcm(PcmSpec::s16(44100, 2), vec![0u8; 8], 0),
            Err(MediaError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_open_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(2500 * 2) {
            writer.write_sample((i % 1000) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let track = AudioTrack::open_wav(&path, 1000).unwrap();
        assert_eq!(track.total_frames(), 2500);
        assert_eq!(track.unit_count(), 3);
        assert_eq!(track.spec(), PcmSpec::s16(44100, 2));

        let first = track.units()[0].payload();
        assert_eq!(&first[..4], &[0, 0, 1, 0]);
    }

    #[test]
    fn test_open_wav_rejects_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            AudioTrack::open_wav(&path, 10),
            Err(MediaError::UnsupportedFormat(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_stream(frames in 0usize..5000, chunk in 1usize..600) {
            let pcm = Bytes::from(stereo_pcm(frames));
            let units = split_pcm(&pcm, 4, chunk);

            prop_assert_eq!(units.len(), chunk_count(frames, chunk));
            if let Some(last) = units.last() {
                let rem = frames % chunk;
                let expected = if rem == 0 { chunk } else { rem };
                prop_assert_eq!(last.len(), expected * 4);
            }

            let joined: Vec<u8> = units.iter().flat_map(|u| u.payload().to_vec()).collect();
            prop_assert_eq!(joined, pcm.to_vec());
        }
    }
}
