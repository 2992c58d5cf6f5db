//! RTP and RTCP wire formats.
//!
//! - [`rtp`]: RTP data packet parsing and the outbound [`PacketBuilder`].
//! - [`rtcp`]: RTCP compound packets (SR, RR, SDES, BYE, APP).
//! - [`raw`]: datagrams as delivered by a transmitter, before parsing.

pub mod raw;
pub mod rtcp;
pub mod rtp;

pub use raw::RawPacket;
pub use rtcp::{RtcpCompoundPacket, RtcpPacket};
pub use rtp::{PacketBuilder, RtpPacket};

/// RTP protocol version written to and required from every packet.
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header without CSRCs or extension.
pub const RTP_HEADER_SIZE: usize = 12;

/// Smallest maximum packet size a session accepts.
pub const RTP_MIN_PACKET_SIZE: usize = 600;

/// Default maximum packet size for new sessions.
pub const RTP_DEFAULT_PACKET_SIZE: usize = 1400;

/// Upper bound on the CSRC list (4-bit count field).
pub const RTP_MAX_CSRCS: usize = 15;

/// Longest SDES item value (8-bit length field).
pub const RTCP_SDES_MAX_ITEM_LENGTH: usize = 255;

/// Longest BYE reason (8-bit length field).
pub const RTCP_BYE_MAX_REASON_LENGTH: usize = 255;
