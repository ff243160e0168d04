//! End-to-end sessions over 127.0.0.1 with OS-assigned ports

use image::Rgb;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use lan_media_streamer::{
    audio::{AudioOutput, AudioPlayback, AudioTrack, JitterBuffer, JitterCapacity, PlaybackEnd},
    config::{AudioChannelConfig, ClientConfig, PlaybackConfig, VideoChannelConfig},
    error::{AudioError, MediaError},
    network::{AudioChannelClient, AudioChannelServer, VideoChannelClient, VideoChannelServer},
    video::{FrameList, FrameSink, RawFrame},
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn audio_server_config() -> AudioChannelConfig {
    AudioChannelConfig {
        bind_address: LOCALHOST,
        port: 0,
        ..Default::default()
    }
}

fn video_server_config() -> VideoChannelConfig {
    VideoChannelConfig {
        bind_address: LOCALHOST,
        port: 0,
        target_width: 32,
        frame_interval_ms: 5,
        ..Default::default()
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        server_host: LOCALHOST,
        handshake_timeout_ms: 2000,
        warmup_ms: 5000,
        stop_poll_ms: 10,
        ..Default::default()
    }
}

/// Stereo 16-bit WAV of `frames` frames; returns the raw little-endian PCM
fn write_wav(path: &Path, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut pcm = Vec::with_capacity(frames * 4);
    for n in 0..frames * 2 {
        let sample = (n % 65536) as u16 as i16;
        writer.write_sample(sample).unwrap();
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    writer.finalize().unwrap();
    pcm
}

#[derive(Default)]
struct RecordingOutput {
    written: Vec<u8>,
}

impl AudioOutput for RecordingOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.written.extend_from_slice(pcm);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_audio_session_delivers_whole_stream() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clip.wav");
    let pcm = write_wav(&wav, 88200);

    let track = AudioTrack::open_wav(&wav, 1764).unwrap();
    assert_eq!(track.unit_count(), 50);

    let server = AudioChannelServer::bind(&audio_server_config(), Arc::new(track))
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(cancel.clone()));

    let played = tokio::task::spawn_blocking(move || {
        let client = AudioChannelClient::connect_to(server_addr, &client_config()).unwrap();
        let handshake = client.handshake().unwrap();
        assert_eq!(handshake.expected_units, 50);

        let (producer, buffer) =
            JitterBuffer::for_stream(JitterCapacity::WholeStream, handshake.expected_units);
        assert_eq!(buffer.capacity(), 50);
        let receiver = client
            .spawn_receiver(producer, CancellationToken::new())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !buffer.is_full() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // The whole stream is buffered before playback starts
        assert_eq!(buffer.len(), 50);

        let mut playback = AudioPlayback::new(RecordingOutput::default(), PlaybackConfig::default());
        let report = playback
            .run(&buffer, handshake.expected_units, 1764, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.end, PlaybackEnd::Complete);
        assert_eq!(report.buffered_at_start, 50);
        assert_eq!(report.units_played, 50);

        let stats = receiver.stop().unwrap();
        assert_eq!(stats.units_received, 50);
        playback.into_output().written
    })
    .await
    .unwrap();

    assert_eq!(played.len(), pcm.len());
    assert!(played == pcm, "played audio differs from the source");

    cancel.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_audio_server_replays_for_each_handshake() {
    let track = AudioTrack::from_pcm(
        lan_media_streamer::audio::PcmSpec::s16(44100, 2),
        vec![7u8; 4 * 100],
        30,
    )
    .unwrap();
    let server = AudioChannelServer::bind(&audio_server_config(), Arc::new(track))
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(cancel.clone()));

    let reports = tokio::task::spawn_blocking(move || {
        (0..2)
            .map(|_| {
                let config = ClientConfig {
                    warmup_ms: 500,
                    ..client_config()
                };
                let client = AudioChannelClient::connect_to(server_addr, &config).unwrap();
                let mut playback =
                    AudioPlayback::new(RecordingOutput::default(), PlaybackConfig::default());
                client.play(&mut playback, &CancellationToken::new()).unwrap()
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    for report in reports {
        assert_eq!(report.end, PlaybackEnd::Complete);
        assert_eq!(report.units_played, 4);
        assert_eq!(report.bytes_played, 400);
    }

    cancel.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_marker_never_starts_a_session() {
    let track = AudioTrack::from_pcm(
        lan_media_streamer::audio::PcmSpec::s16(44100, 2),
        vec![0u8; 4 * 10],
        5,
    )
    .unwrap();
    let server = AudioChannelServer::bind(&audio_server_config(), Arc::new(track))
        .await
        .unwrap()
        .with_ignored_marker(&b"SYNC_MARKER"[..]);
    let server_addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(cancel.clone()));

    tokio::task::spawn_blocking(move || {
        let viewer = UdpSocket::bind("127.0.0.1:0").unwrap();
        viewer
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut buf = [0u8; 64];

        viewer.send_to(b"SYNC_MARKER", server_addr).unwrap();
        assert!(viewer.recv_from(&mut buf).is_err());

        viewer.send_to(b"Hello", server_addr).unwrap();
        let (len, _) = viewer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"2");
    })
    .await
    .unwrap();

    cancel.cancel();
    server_task.await.unwrap().unwrap();
}

/// Records the top-left red value of every frame; cancels after `limit`
struct CollectingSink {
    shades: Vec<u8>,
    limit: usize,
    cancel: CancellationToken,
}

impl FrameSink for CollectingSink {
    fn render(&mut self, frame: &RawFrame, _fps: u32) -> Result<(), MediaError> {
        self.shades.push(frame.get_pixel(0, 0)[0]);
        if self.shades.len() >= self.limit {
            self.cancel.cancel();
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_video_frames_arrive_in_order_then_source_ends() {
    const FRAMES: usize = 6;
    let frames = (0..FRAMES)
        .map(|n| RawFrame::from_pixel(64, 48, Rgb([(n * 40) as u8, 0, 0])))
        .collect();

    let server = VideoChannelServer::bind(&video_server_config(), FrameList::new(frames, 30.0))
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let server_cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(server_cancel.clone()));

    let (report, shades) = tokio::task::spawn_blocking(move || {
        let client = VideoChannelClient::connect_to(server_addr, &client_config()).unwrap();
        client.handshake().unwrap();

        let cancel = CancellationToken::new();
        let watchdog = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_secs(5));
                cancel.cancel();
            })
        };
        let mut sink = CollectingSink {
            shades: Vec::new(),
            limit: FRAMES,
            cancel,
        };
        let cancel = sink.cancel.clone();
        let report = client.run(&mut sink, &cancel).unwrap();
        drop(watchdog);
        (report, sink.shades)
    })
    .await
    .unwrap();

    assert_eq!(report.frames_rendered, FRAMES as u64);
    assert_eq!(report.frames_dropped, 0);
    assert!(
        shades.windows(2).all(|w| w[0] < w[1]),
        "frames out of order: {:?}",
        shades
    );

    // The server stops once its source is exhausted
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // A later handshake gets nothing back
    tokio::task::spawn_blocking(move || {
        let late = UdpSocket::bind("127.0.0.1:0").unwrap();
        late.set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        late.send_to(b"Hello", server_addr).unwrap();
        let mut buf = [0u8; 1024];
        assert!(late.recv_from(&mut buf).is_err());
    })
    .await
    .unwrap();
}

#[test]
fn test_handshake_without_server_fails() {
    // Reserve a port, then free it so nothing answers
    let addr: SocketAddr = {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    };
    let config = ClientConfig {
        handshake_timeout_ms: 200,
        ..client_config()
    };
    let client = AudioChannelClient::connect_to(addr, &config).unwrap();
    assert!(client.handshake().is_err());
}
