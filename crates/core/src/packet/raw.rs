use std::net::SocketAddr;
use std::time::Instant;

/// An inbound datagram queued by a transmitter.
///
/// Carries the bytes exactly as received plus the sender address, the
/// receive instant and whether it arrived on the RTP or the RTCP channel.
#[derive(Debug, Clone)]
pub struct RawPacket {
    data: Vec<u8>,
    sender: SocketAddr,
    receive_time: Instant,
    is_rtp: bool,
}

impl RawPacket {
    pub fn new(data: Vec<u8>, sender: SocketAddr, is_rtp: bool) -> Self {
        Self::with_receive_time(data, sender, is_rtp, Instant::now())
    }

    pub fn with_receive_time(
        data: Vec<u8>,
        sender: SocketAddr,
        is_rtp: bool,
        receive_time: Instant,
    ) -> Self {
        Self {
            data,
            sender,
            receive_time,
            is_rtp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    pub fn receive_time(&self) -> Instant {
        self.receive_time
    }

    pub fn is_rtp(&self) -> bool {
        self.is_rtp
    }
}
