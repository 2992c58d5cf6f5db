//! Transport abstraction carrying raw RTP and RTCP datagrams.
//!
//! A [`Transmitter`] knows nothing about RTP semantics. It owns a
//! destination set, a receive filter, multicast memberships and a queue
//! of inbound [`RawPacket`]s:
//!
//! ```text
//!            send_rtp_data / send_rtcp_data
//!   session ───────────────────────────────► every Destination
//!      ▲                                       (rtp port / rtp port + 1)
//!      │ get_next_packet
//!   ┌──┴───────────┐  poll   ┌─────────────┐
//!   │ RawPacket    │◄────────│ ReceiveFilter│◄── datagrams
//!   │ queue (FIFO) │         └─────────────┘
//!   └──────────────┘
//! ```
//!
//! Variants: [`UdpTransmitter`] (IPv4 and IPv6 sockets) and
//! [`FakeTransmitter`] (host-fed input, callback output). Any other type
//! implementing the trait can be plugged in as
//! [`TransmissionProtocol::UserDefined`].

mod common;
mod destination;
mod fake;
mod filter;
mod udp;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub use destination::Destination;
pub use fake::{FakeTransmissionInfo, FakeTransmissionParams, FakeTransmitter, PacketReadyCallback};
pub use filter::{PortInfo, ReceiveFilter};
pub use udp::{UdpTransmissionInfo, UdpTransmissionParams, UdpTransmitter};

use crate::error::Result;
use crate::packet::RawPacket;

/// IP (20) + UDP (8) header bytes per datagram.
pub const UDPV4_HEADER_OVERHEAD: usize = 28;

/// IPv6 (40) + UDP (8) header bytes per datagram.
pub const UDPV6_HEADER_OVERHEAD: usize = 48;

/// Largest datagram any bundled transmitter accepts.
pub const MAX_TRANSMITTER_PACKET_SIZE: usize = 65535;

/// Bucket count for destination and filter tables.
pub(crate) const TRANSMITTER_HASH_SIZE: usize = 8317;

/// Protocol discriminant selecting the transmitter variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionProtocol {
    Ipv4Udp,
    Ipv6Udp,
    Fake,
    UserDefined,
}

impl fmt::Display for TransmissionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4Udp => write!(f, "UDP/IPv4"),
            Self::Ipv6Udp => write!(f, "UDP/IPv6"),
            Self::Fake => write!(f, "fake"),
            Self::UserDefined => write!(f, "user-defined"),
        }
    }
}

/// Inbound filter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    /// Accept every datagram.
    #[default]
    AcceptAll,
    /// Accept only datagrams matching the accept list.
    AcceptSome,
    /// Accept everything except datagrams matching the ignore list.
    IgnoreSome,
}

/// Transport configuration handed to [`Transmitter::create`].
#[derive(Debug, Clone)]
pub enum TransmissionParams {
    Udpv4(UdpTransmissionParams),
    Udpv6(UdpTransmissionParams),
    Fake(FakeTransmissionParams),
    /// Parameters of a user-defined transmitter are its own business.
    UserDefined,
}

impl TransmissionParams {
    pub fn protocol(&self) -> TransmissionProtocol {
        match self {
            Self::Udpv4(_) => TransmissionProtocol::Ipv4Udp,
            Self::Udpv6(_) => TransmissionProtocol::Ipv6Udp,
            Self::Fake(_) => TransmissionProtocol::Fake,
            Self::UserDefined => TransmissionProtocol::UserDefined,
        }
    }
}

/// Snapshot of a created transmitter's local endpoints.
#[derive(Debug, Clone)]
pub enum TransmissionInfo {
    Udpv4(UdpTransmissionInfo),
    Udpv6(UdpTransmissionInfo),
    Fake(FakeTransmissionInfo),
    UserDefined,
}

impl TransmissionInfo {
    pub fn protocol(&self) -> TransmissionProtocol {
        match self {
            Self::Udpv4(_) => TransmissionProtocol::Ipv4Udp,
            Self::Udpv6(_) => TransmissionProtocol::Ipv6Udp,
            Self::Fake(_) => TransmissionProtocol::Fake,
            Self::UserDefined => TransmissionProtocol::UserDefined,
        }
    }
}

/// Datagram transport used by an [`RtpSession`](crate::RtpSession).
///
/// Lifecycle is `init` → `create` → … → `destroy`; `destroy` may be
/// called after a failed `create`. All methods take `&self` so a
/// transmitter can be shared with the session's poll thread.
///
/// Destinations are given as the RTP address; the RTCP port is the RTP
/// port plus one. Accept/ignore entries with port 0 cover every port of
/// the address.
pub trait Transmitter: Send + Sync {
    /// Which transport this is.
    fn protocol(&self) -> TransmissionProtocol;

    /// First lifecycle step. `threadsafe` asks for internal locking so a
    /// poll thread can share the transmitter; transports that cannot
    /// provide it fail with [`ThreadsNotSupported`](crate::RtpError::ThreadsNotSupported).
    fn init(&self, threadsafe: bool) -> Result<()>;

    /// Open sockets (or the equivalent) for `params`, which must match
    /// [`protocol`](Self::protocol).
    fn create(&self, max_packet_size: usize, params: &TransmissionParams) -> Result<()>;

    /// Release everything `create` acquired. Safe to call repeatedly.
    fn destroy(&self);

    /// `None` until `create` succeeds.
    fn transmission_info(&self) -> Option<TransmissionInfo>;

    /// Copy the local host name into `buffer`, returning its length.
    ///
    /// Fails with [`BufferTooSmall`](crate::RtpError::BufferTooSmall)
    /// carrying the required length when `buffer` is too short.
    fn local_host_name(&self, buffer: &mut [u8]) -> Result<usize>;

    /// Whether `addr` is one of this transmitter's own sockets.
    fn comes_from_this_transmitter(&self, addr: &SocketAddr) -> bool;

    /// Lower-layer header bytes added to every datagram.
    fn header_overhead(&self) -> usize;

    /// Move every pending inbound datagram into the packet queue
    /// without blocking.
    fn poll(&self) -> Result<()>;

    /// Block until data arrives, `timeout` elapses, or
    /// [`abort_wait`](Self::abort_wait) is called. Returns whether data
    /// is available.
    fn wait_for_incoming_data(&self, timeout: Duration) -> Result<bool>;

    /// Interrupt the current wait, or the next one if none is in progress.
    fn abort_wait(&self) -> Result<()>;

    /// Send to every destination's RTP port.
    fn send_rtp_data(&self, data: &[u8]) -> Result<()>;

    /// Send to every destination's RTCP port.
    fn send_rtcp_data(&self, data: &[u8]) -> Result<()>;

    /// Zero both sent-packet counters.
    fn reset_packet_count(&self);
    fn num_rtp_packets_sent(&self) -> u32;
    fn num_rtcp_packets_sent(&self) -> u32;

    /// Add a unicast destination. Duplicates are refused.
    fn add_destination(&self, addr: SocketAddr) -> Result<()>;
    fn delete_destination(&self, addr: SocketAddr) -> Result<()>;
    fn clear_destinations(&self);

    fn supports_multicasting(&self) -> bool;

    /// Join `addr` on the RTP and RTCP sockets. Joining twice is refused.
    fn join_multicast_group(&self, addr: IpAddr) -> Result<()>;
    fn leave_multicast_group(&self, addr: IpAddr) -> Result<()>;
    fn leave_all_multicast_groups(&self);

    /// Switch the receive mode. The accept/ignore table is always cleared.
    fn set_receive_mode(&self, mode: ReceiveMode) -> Result<()>;

    /// Only allowed in [`ReceiveMode::IgnoreSome`].
    fn add_to_ignore_list(&self, addr: SocketAddr) -> Result<()>;
    fn delete_from_ignore_list(&self, addr: SocketAddr) -> Result<()>;
    fn clear_ignore_list(&self);

    /// Only allowed in [`ReceiveMode::AcceptSome`].
    fn add_to_accept_list(&self, addr: SocketAddr) -> Result<()>;
    fn delete_from_accept_list(&self, addr: SocketAddr) -> Result<()>;
    fn clear_accept_list(&self);

    /// Largest datagram that will be sent or accepted.
    fn set_maximum_packet_size(&self, size: usize) -> Result<()>;

    /// Whether [`get_next_packet`](Self::get_next_packet) has something.
    fn new_data_available(&self) -> bool;

    /// Pop the oldest datagram queued by [`poll`](Self::poll).
    fn get_next_packet(&self) -> Option<RawPacket>;
}
