//! UDP socket setup
//!
//! Every endpoint gets an enlarged receive buffer so bursts of full-size
//! datagrams are less likely to be dropped by the kernel.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub use tokio::net::UdpSocket;

use crate::error::NetworkError;

/// Create a bound blocking socket with the requested receive buffer size
pub fn create_std_socket(
    bind: SocketAddr,
    recv_buffer_size: usize,
) -> Result<std::net::UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind, e)))?;

    // The kernel may clamp this; a smaller buffer only raises drop probability
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        tracing::warn!("Could not set receive buffer to {} bytes: {}", recv_buffer_size, e);
    }

    socket
        .bind(&bind.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind, e)))?;

    if let Ok(actual) = socket.recv_buffer_size() {
        tracing::debug!("Bound {} with {} byte receive buffer", bind, actual);
    }

    Ok(socket.into())
}

/// Create a bound tokio socket. Must be called inside a tokio runtime.
pub fn create_socket(bind: SocketAddr, recv_buffer_size: usize) -> Result<UdpSocket, NetworkError> {
    let socket = create_std_socket(bind, recv_buffer_size)?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    UdpSocket::from_std(socket).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Wildcard address with an ephemeral port, in the same family as `peer`
pub fn ephemeral_for(peer: SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
