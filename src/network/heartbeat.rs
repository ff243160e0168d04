//! Periodic heartbeat marker sent from the client to both servers

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatConfig;
use crate::constants::RECV_BUFFER_SIZE;
use crate::error::{NetworkError, Result};
use crate::network::udp::{create_socket, ephemeral_for, UdpSocket};

/// Sends the marker to every target once per interval until cancelled
pub struct HeartbeatBroadcaster {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    marker: Bytes,
    interval: Duration,
}

impl HeartbeatBroadcaster {
    pub async fn bind(config: &HeartbeatConfig, targets: Vec<SocketAddr>) -> Result<Self> {
        let bind = targets
            .first()
            .map(|t| ephemeral_for(*t))
            .ok_or_else(|| crate::Error::Config("heartbeat needs at least one target".into()))?;
        let socket = create_socket(bind, RECV_BUFFER_SIZE)?;

        Ok(Self {
            socket,
            targets,
            marker: Bytes::from(config.marker.clone()),
            interval: config.interval().max(Duration::from_millis(1)),
        })
    }

    /// Returns the number of heartbeats sent
    pub async fn run(self, cancel: CancellationToken) -> Result<u64> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats = 0u64;

        tracing::info!(
            "Heartbeat every {}ms to {:?}",
            self.interval.as_millis(),
            self.targets
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for target in &self.targets {
                        self.socket
                            .send_to(&self.marker, target)
                            .await
                            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", target, e)))?;
                    }
                    beats += 1;
                    tracing::trace!("Heartbeat {} sent", beats);
                }
            }
        }

        tracing::debug!("Heartbeat stopped after {} beats", beats);
        Ok(beats)
    }
}
