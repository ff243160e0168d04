//! Audio and video channel clients
//!
//! Clients block on std sockets in dedicated threads. Every blocking receive
//! carries a short timeout so a cancelled session is noticed within one poll
//! interval.

use bytes::Bytes;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::audio::buffer::{JitterBuffer, JitterProducer, PushError};
use crate::audio::playback::{AudioOutput, AudioPlayback, PlaybackReport};
use crate::config::ClientConfig;
use crate::constants::RECV_BUFFER_SIZE;
use crate::diagnostics::TimestampLog;
use crate::error::{HandshakeError, NetworkError, Result};
use crate::media::MediaUnit;
use crate::network::protocol;
use crate::network::udp::{create_std_socket, ephemeral_for};
use crate::video::codec::FrameDecoder;
use crate::video::display::{FpsMeter, FrameSink};

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn open_client_socket(server: SocketAddr, recv_buffer_size: usize) -> Result<UdpSocket> {
    Ok(create_std_socket(ephemeral_for(server), recv_buffer_size)?)
}

fn send_handshake(socket: &UdpSocket, payload: &[u8], server: SocketAddr) -> Result<()> {
    socket
        .send_to(payload, server)
        .map_err(|e| NetworkError::SendFailed(format!("{}: {}", server, e)))?;
    Ok(())
}

/// Outcome of the audio handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Number of units the server will send
    pub expected_units: u64,
}

/// Receive-thread totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub units_received: u64,
    pub bytes_received: u64,
}

/// Handle onto a running audio receive thread
pub struct ReceiverHandle {
    handle: JoinHandle<Result<ReceiveStats>>,
    cancel: CancellationToken,
}

impl ReceiverHandle {
    /// Stop receiving and wait for the thread
    pub fn stop(self) -> Result<ReceiveStats> {
        self.cancel.cancel();
        self.join()
    }

    pub fn join(self) -> Result<ReceiveStats> {
        self.handle
            .join()
            .map_err(|_| NetworkError::ReceiveFailed("receive thread panicked".into()))?
    }
}

/// Client side of the audio channel
pub struct AudioChannelClient {
    socket: UdpSocket,
    server: SocketAddr,
    config: ClientConfig,
}

impl AudioChannelClient {
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_to(config.audio_server(), config)
    }

    pub fn connect_to(server: SocketAddr, config: &ClientConfig) -> Result<Self> {
        let socket = open_client_socket(server, config.recv_buffer_size)?;
        Ok(Self {
            socket,
            server,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send the handshake and wait for the size reply
    pub fn handshake(&self) -> Result<HandshakeResult> {
        send_handshake(&self.socket, self.config.handshake_payload.as_bytes(), self.server)?;
        tracing::info!("Audio handshake sent to {}", self.server);

        self.socket.set_read_timeout(Some(self.config.handshake_timeout()))?;
        let mut buf = [0u8; 64];
        let len = match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if is_timeout(&e) => {
                return Err(HandshakeError::NoReply(self.server.to_string()).into())
            }
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
        };

        let expected_units = protocol::parse_size_reply(&buf[..len])?;
        if expected_units > self.config.max_expected_units {
            return Err(HandshakeError::Malformed(format!(
                "server announced {} units, limit is {}",
                expected_units, self.config.max_expected_units
            ))
            .into());
        }
        tracing::info!("Size of received data: {}", expected_units);
        Ok(HandshakeResult { expected_units })
    }

    /// Start the receive thread; every datagram becomes one unit pushed
    /// through `producer`. The thread drops its producer when it exits.
    pub fn spawn_receiver(
        &self,
        producer: JitterProducer,
        cancel: CancellationToken,
    ) -> Result<ReceiverHandle> {
        let socket = self.socket.try_clone()?;
        let poll = self.config.stop_poll();
        socket.set_read_timeout(Some(poll))?;

        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("audio-receiver".into())
            .spawn(move || receive_audio(socket, producer, poll, thread_cancel))?;

        Ok(ReceiverHandle { handle, cancel })
    }

    /// Handshake, fill the jitter buffer for the warm-up period, then play
    /// every announced unit through `playback`
    pub fn play<O: AudioOutput>(
        &self,
        playback: &mut AudioPlayback<O>,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport> {
        let handshake = self.handshake()?;
        let (producer, buffer) =
            JitterBuffer::for_stream(self.config.jitter_capacity, handshake.expected_units);
        let receiver = self.spawn_receiver(producer, cancel.child_token())?;

        self.warm_up(&buffer, cancel);

        let played = playback.run(
            &buffer,
            handshake.expected_units,
            self.config.chunk_frames,
            cancel,
        );

        let received = receiver.stop()?;
        let stats = buffer.stats();
        tracing::info!(
            "Audio receive finished: {} units, {} bytes, buffer high water {}/{}",
            received.units_received,
            received.bytes_received,
            stats.high_water,
            stats.capacity
        );

        Ok(played?)
    }

    /// Wait out the warm-up period; ends early once the buffer is full
    fn warm_up(&self, buffer: &JitterBuffer, cancel: &CancellationToken) {
        let warmup = self.config.warmup();
        let poll = self.config.stop_poll();
        let start = Instant::now();

        tracing::info!("Buffering audio for up to {:.1}s", warmup.as_secs_f64());
        while !buffer.is_full() && !cancel.is_cancelled() {
            let elapsed = start.elapsed();
            if elapsed >= warmup {
                break;
            }
            thread::sleep(poll.min(warmup - elapsed));
        }
        tracing::info!("Buffered {} of {} units", buffer.len(), buffer.capacity());
    }
}

fn receive_audio(
    socket: UdpSocket,
    producer: JitterProducer,
    poll: Duration,
    cancel: CancellationToken,
) -> Result<ReceiveStats> {
    let mut stats = ReceiveStats::default();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    'receive: while !cancel.is_cancelled() {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                tracing::error!("Audio receive failed: {}", e);
                return Err(NetworkError::ReceiveFailed(e.to_string()).into());
            }
        };

        let mut unit = MediaUnit::audio(Bytes::copy_from_slice(&buf[..len]));
        loop {
            match producer.push_timeout(unit, poll) {
                Ok(()) => break,
                Err(PushError::Full(back)) => {
                    if cancel.is_cancelled() {
                        break 'receive;
                    }
                    unit = back;
                }
                Err(PushError::Closed(_)) => {
                    tracing::debug!("Playback dropped the jitter buffer, stopping receive");
                    break 'receive;
                }
            }
        }

        stats.units_received += 1;
        stats.bytes_received += len as u64;
        tracing::debug!("Queue size while loading: {}", producer.len());
    }

    Ok(stats)
}

/// Totals for one video session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoReport {
    pub frames_received: u64,
    pub frames_rendered: u64,
    /// Datagrams that did not decode to an image
    pub frames_dropped: u64,
}

/// Client side of the video channel
pub struct VideoChannelClient {
    socket: UdpSocket,
    server: SocketAddr,
    handshake_payload: String,
    poll: Duration,
    decoder: FrameDecoder,
    fps: FpsMeter,
    timestamps: Option<TimestampLog>,
}

impl VideoChannelClient {
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_to(config.video_server(), config)
    }

    pub fn connect_to(server: SocketAddr, config: &ClientConfig) -> Result<Self> {
        let socket = open_client_socket(server, config.recv_buffer_size)?;
        Ok(Self {
            socket,
            server,
            handshake_payload: config.handshake_payload.clone(),
            poll: config.stop_poll(),
            decoder: FrameDecoder::new(),
            fps: FpsMeter::new(config.fps_window),
            timestamps: None,
        })
    }

    pub fn with_timestamps(mut self, log: Option<TimestampLog>) -> Self {
        self.timestamps = log;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Announce this client; the video server sends no reply
    pub fn handshake(&self) -> Result<()> {
        send_handshake(&self.socket, self.handshake_payload.as_bytes(), self.server)?;
        tracing::info!("Video handshake sent to {}", self.server);
        Ok(())
    }

    /// Decode and render frames until cancelled
    pub fn run<K: FrameSink + ?Sized>(
        mut self,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<VideoReport> {
        self.socket.set_read_timeout(Some(self.poll))?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut report = VideoReport::default();

        while !cancel.is_cancelled() {
            let len = match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
            };
            report.frames_received += 1;

            let frame = match self.decoder.decode(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    report.frames_dropped += 1;
                    tracing::debug!("Dropping undecodable frame: {}", e);
                    continue;
                }
            };
            report.frames_rendered += 1;

            if let Some(log) = self.timestamps.as_mut() {
                if let Err(e) = log.record(report.frames_rendered) {
                    tracing::warn!("Disabling timestamp log {}: {}", log.path().display(), e);
                    self.timestamps = None;
                }
            }

            let fps = self.fps.tick();
            if let Err(e) = sink.render(&frame, fps) {
                tracing::warn!("Failed to render frame {}: {}", report.frames_rendered, e);
            }
        }

        tracing::info!(
            "Video session ended: {} received, {} rendered, {} dropped",
            report.frames_received,
            report.frames_rendered,
            report.frames_dropped
        );
        Ok(report)
    }
}
