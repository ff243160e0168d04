//! Network subsystem: UDP transport for the audio and video channels

pub mod heartbeat;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod udp;

pub use heartbeat::HeartbeatBroadcaster;
pub use receiver::{
    AudioChannelClient, HandshakeResult, ReceiveStats, ReceiverHandle, VideoChannelClient,
    VideoReport,
};
pub use sender::{AudioChannelServer, VideoChannelServer};
pub use session::{Session, SessionEnd, SessionReport};
pub use udp::{create_socket, UdpSocket};
