//! Audio and video channel servers
//!
//! Each server owns one UDP socket. It waits for a handshake datagram and
//! then streams every unit to the handshake's source address. Handshakes are
//! handled one at a time; datagrams arriving mid-stream are not read until
//! the session ends.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audio::source::AudioTrack;
use crate::config::{AudioChannelConfig, VideoChannelConfig};
use crate::constants::{MAX_UDP_PAYLOAD, RECV_BUFFER_SIZE};
use crate::error::{NetworkError, Result};
use crate::media::MediaKind;
use crate::network::protocol;
use crate::network::session::{Session, SessionEnd, SessionReport};
use crate::network::udp::{create_socket, UdpSocket};
use crate::video::codec::FrameEncoder;
use crate::video::display::{FpsMeter, FrameSink};
use crate::video::source::FrameSource;

/// Wait for the next handshake, skipping heartbeat markers.
/// Returns `None` if cancelled first.
async fn await_handshake(
    socket: &UdpSocket,
    buf: &mut [u8],
    ignore: Option<&[u8]>,
    kind: MediaKind,
    cancel: &CancellationToken,
) -> Result<Option<Session>> {
    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            received = socket.recv_from(buf) => {
                received.map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?
            }
        };

        if ignore.is_some_and(|marker| protocol::is_marker(&buf[..len], marker)) {
            tracing::trace!("Ignoring heartbeat from {}", peer);
            continue;
        }

        let session = Session::new(kind, peer);
        tracing::info!(
            "{} session {} connected to {} ({} byte handshake)",
            kind,
            session.id(),
            peer,
            len
        );
        return Ok(Some(session));
    }
}

/// Sleep for `interval`; returns false if cancelled first
async fn pace(interval: Duration, cancel: &CancellationToken) -> bool {
    if interval.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

async fn transmit(socket: &UdpSocket, payload: &[u8], peer: SocketAddr) -> Result<usize> {
    let sent = socket
        .send_to(payload, peer)
        .await
        .map_err(|e| NetworkError::SendFailed(format!("{}: {}", peer, e)))?;
    Ok(sent)
}

/// Serves one pre-chunked audio track to every viewer that handshakes
pub struct AudioChannelServer {
    socket: UdpSocket,
    track: Arc<AudioTrack>,
    send_interval: Duration,
    marker: Option<Bytes>,
    recv_buf: Vec<u8>,
}

impl AudioChannelServer {
    pub async fn bind(config: &AudioChannelConfig, track: Arc<AudioTrack>) -> Result<Self> {
        if let Some(unit) = track.units().iter().find(|u| u.len() > MAX_UDP_PAYLOAD) {
            return Err(NetworkError::PacketTooLarge(unit.len()).into());
        }

        let socket = create_socket(config.bind_addr(), config.recv_buffer_size)?;
        tracing::info!(
            "Audio server listening on {} ({} units of {} frames)",
            socket.local_addr()?,
            track.unit_count(),
            track.chunk_frames()
        );

        Ok(Self {
            socket,
            track,
            send_interval: config.send_interval(),
            marker: None,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    /// Skip datagrams equal to `marker` while waiting for a handshake.
    /// A viewer whose handshake payload equals the marker is never served.
    pub fn with_ignored_marker(mut self, marker: impl Into<Bytes>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the next handshake
    pub async fn accept(&mut self, cancel: &CancellationToken) -> Result<Option<Session>> {
        await_handshake(
            &self.socket,
            &mut self.recv_buf,
            self.marker.as_deref(),
            MediaKind::Audio,
            cancel,
        )
        .await
    }

    /// Send the size reply followed by every unit, in order
    pub async fn stream(&self, session: &Session, cancel: &CancellationToken) -> Result<SessionReport> {
        let peer = session.peer();
        let count = self.track.unit_count() as u64;

        tracing::info!("Sending data size {}", count);
        transmit(&self.socket, &protocol::encode_size_reply(count), peer).await?;

        let mut units_sent = 0u64;
        let mut bytes_sent = 0u64;

        for unit in self.track.units() {
            if cancel.is_cancelled() {
                return Ok(session.finish(units_sent, bytes_sent, SessionEnd::Cancelled));
            }

            bytes_sent += transmit(&self.socket, unit.payload(), peer).await? as u64;
            units_sent += 1;

            if !pace(self.send_interval, cancel).await {
                return Ok(session.finish(units_sent, bytes_sent, SessionEnd::Cancelled));
            }
        }

        Ok(session.finish(units_sent, bytes_sent, SessionEnd::Completed))
    }

    /// Serve handshakes until cancelled; every handshake replays the track
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        while let Some(session) = self.accept(&cancel).await? {
            let report = self.stream(&session, &cancel).await?;
            if report.end == SessionEnd::Cancelled {
                break;
            }
        }
        tracing::info!("Audio server stopped");
        Ok(())
    }
}

/// Streams frames from a [`FrameSource`] to the viewer that handshakes
///
/// The source is consumed by the first session that reaches its end; a
/// server whose source is exhausted stops accepting handshakes.
pub struct VideoChannelServer<S: FrameSource> {
    socket: UdpSocket,
    source: S,
    encoder: FrameEncoder,
    frame_interval: Option<Duration>,
    marker: Option<Bytes>,
    preview: Option<Box<dyn FrameSink>>,
    fps: FpsMeter,
    exhausted: bool,
    recv_buf: Vec<u8>,
}

impl<S: FrameSource> VideoChannelServer<S> {
    pub async fn bind(config: &VideoChannelConfig, source: S) -> Result<Self> {
        let socket = create_socket(config.bind_addr(), config.recv_buffer_size)?;
        let meta = source.meta();
        tracing::info!(
            "Video server listening on {} ({:.1} fps source, {} frames, {:.1}s)",
            socket.local_addr()?,
            meta.frame_rate,
            meta.frame_count.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            meta.duration_secs().unwrap_or(0.0)
        );

        Ok(Self {
            socket,
            source,
            encoder: FrameEncoder::new(config.target_width, config.jpeg_quality),
            frame_interval: config.frame_interval(),
            marker: None,
            preview: None,
            fps: FpsMeter::new(config.fps_window),
            exhausted: false,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    /// Skip datagrams equal to `marker` while waiting for a handshake.
    /// A viewer whose handshake payload equals the marker is never served.
    pub fn with_ignored_marker(mut self, marker: impl Into<Bytes>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Show every sent frame locally as well
    pub fn with_preview(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Wait for the next handshake
    pub async fn accept(&mut self, cancel: &CancellationToken) -> Result<Option<Session>> {
        await_handshake(
            &self.socket,
            &mut self.recv_buf,
            self.marker.as_deref(),
            MediaKind::Video,
            cancel,
        )
        .await
    }

    /// Read, encode and transmit frames until the source ends
    pub async fn stream(
        &mut self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        let peer = session.peer();
        let mut units_sent = 0u64;
        let mut bytes_sent = 0u64;
        let mut frame_number = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(session.finish(units_sent, bytes_sent, SessionEnd::Cancelled));
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable frame: {}", e);
                    continue;
                }
            };
            frame_number += 1;

            let payload = match self.encoder.encode(&frame) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Failed to encode frame {}: {}", frame_number, e);
                    continue;
                }
            };

            if let Err(e) = protocol::check_datagram_size(payload.len()) {
                tracing::warn!("Skipping frame {}: {}", frame_number, e);
                continue;
            }

            bytes_sent += transmit(&self.socket, &payload, peer).await? as u64;
            units_sent += 1;
            tracing::trace!("Sent frame {} ({} bytes)", frame_number, payload.len());

            if let Some(sink) = self.preview.as_mut() {
                let fps = self.fps.tick();
                if let Err(e) = sink.render(&frame, fps) {
                    tracing::warn!("Preview disabled: {}", e);
                    self.preview = None;
                }
            }

            if let Some(interval) = self.frame_interval {
                if !pace(interval, cancel).await {
                    return Ok(session.finish(units_sent, bytes_sent, SessionEnd::Cancelled));
                }
            }
        }

        let stats = self.encoder.stats();
        tracing::info!(
            "Video source exhausted after {} frames, average {:.0} bytes per frame",
            stats.frames_encoded,
            stats.average_frame_size
        );
        Ok(session.finish(units_sent, bytes_sent, SessionEnd::Completed))
    }

    /// Serve handshakes until the source is exhausted or cancelled
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        while !self.exhausted {
            let Some(session) = self.accept(&cancel).await? else {
                break;
            };
            let report = self.stream(&session, &cancel).await?;
            if report.end == SessionEnd::Cancelled {
                break;
            }
        }
        tracing::info!("Video server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::PcmSpec;
    use crate::video::source::{FrameList, RawFrame};
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback_audio(chunk_frames: usize) -> AudioChannelConfig {
        AudioChannelConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            chunk_frames,
            send_interval_ms: 0,
            ..Default::default()
        }
    }

    fn loopback_video() -> VideoChannelConfig {
        VideoChannelConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            frame_interval_ms: 0,
            target_width: 16,
            ..Default::default()
        }
    }

    async fn client() -> UdpSocket {
        create_socket("127.0.0.1:0".parse().unwrap(), RECV_BUFFER_SIZE).unwrap()
    }

    async fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        buf.truncate(len);
        buf
    }

    #[tokio::test]
    async fn test_audio_size_reply_precedes_units() {
        let pcm: Vec<u8> = (0..40u8).collect();
        let track = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), pcm, 3).unwrap();
        assert_eq!(track.unit_count(), 4);

        let server = AudioChannelServer::bind(&loopback_audio(3), Arc::new(track))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.run(cancel.clone()));

        let viewer = client().await;
        viewer.send_to(b"Hello", addr).await.unwrap();

        assert_eq!(recv(&viewer).await, b"4");
        assert_eq!(recv(&viewer).await, (0..12u8).collect::<Vec<_>>());
        assert_eq!(recv(&viewer).await, (12..24u8).collect::<Vec<_>>());
        assert_eq!(recv(&viewer).await, (24..36u8).collect::<Vec<_>>());
        assert_eq!(recv(&viewer).await, (36..40u8).collect::<Vec<_>>());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_audio_rejects_oversize_units() {
        // 16384 stereo frames = 65536 bytes per unit
        let pcm = vec![0u8; 16384 * 4 * 2];
        let track = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), pcm, 16384).unwrap();
        let result = AudioChannelServer::bind(&loopback_audio(16384), Arc::new(track)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_video_server_exhausts_source() {
        let frames = (0..3).map(|_| RawFrame::new(32, 16)).collect();
        let mut server = VideoChannelServer::bind(&loopback_video(), FrameList::new(frames, 30.0))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let viewer = client().await;
        viewer.send_to(b"Hello", addr).await.unwrap();

        let session = server.accept(&cancel).await.unwrap().unwrap();
        assert_eq!(session.peer(), viewer.local_addr().unwrap());

        let report = server.stream(&session, &cancel).await.unwrap();
        assert_eq!(report.units_sent, 3);
        assert_eq!(report.end, SessionEnd::Completed);
        assert!(server.is_exhausted());

        for _ in 0..3 {
            let payload = recv(&viewer).await;
            assert!(!payload.is_empty());
        }
    }

    #[tokio::test]
    async fn test_marker_is_not_a_handshake() {
        let frames = vec![RawFrame::new(8, 8)];
        let mut server = VideoChannelServer::bind(&loopback_video(), FrameList::new(frames, 30.0))
            .await
            .unwrap()
            .with_ignored_marker(&b"SYNC_MARKER"[..]);
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let beacon = client().await;
        let viewer = client().await;
        beacon.send_to(b"SYNC_MARKER", addr).await.unwrap();
        viewer.send_to(b"Hello", addr).await.unwrap();

        let session = server.accept(&cancel).await.unwrap().unwrap();
        assert_eq!(session.peer(), viewer.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_accept_returns_none_on_cancel() {
        let track = AudioTrack::from_pcm(PcmSpec::s16(44100, 2), vec![0u8; 16], 2).unwrap();
        let mut server = AudioChannelServer::bind(&loopback_audio(2), Arc::new(track))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(server.accept(&cancel).await.unwrap().is_none());
    }
}
