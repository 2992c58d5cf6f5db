//! Error types for the RTP session library.

use std::fmt;

use crate::transmitter::TransmissionProtocol;

/// Errors that can occur in the RTP session library.
///
/// Variants are grouped by the layer that raises them:
///
/// - **State**: [`NotCreated`](Self::NotCreated),
///   [`AlreadyCreated`](Self::AlreadyCreated),
///   [`TransmitterNotInitialized`](Self::TransmitterNotInitialized),
///   [`TransmitterAlreadyInitialized`](Self::TransmitterAlreadyInitialized),
///   [`BuilderNotInitialized`](Self::BuilderNotInitialized).
/// - **Configuration**: [`PacketSizeTooSmall`](Self::PacketSizeTooSmall),
///   [`PacketSizeTooBig`](Self::PacketSizeTooBig),
///   [`IllegalParameters`](Self::IllegalParameters),
///   [`UserTransmitterMissing`](Self::UserTransmitterMissing),
///   [`PortbaseNotEven`](Self::PortbaseNotEven),
///   [`SchedulerParameter`](Self::SchedulerParameter).
/// - **Resource**: [`Io`](Self::Io), [`NoLocalIps`](Self::NoLocalIps),
///   [`ThreadSpawn`](Self::ThreadSpawn).
/// - **Collection**: [`Collection`](Self::Collection).
/// - **Transmitter**: multicast, filter and wait failures.
/// - **Protocol/runtime**: CNAME, poll-thread and packet errors.
#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has not been created, or was destroyed.
    #[error("session not created")]
    NotCreated,

    /// `create` was called on a session that is already running.
    #[error("session already created")]
    AlreadyCreated,

    #[error("transmitter not initialized")]
    TransmitterNotInitialized,

    #[error("transmitter already initialized")]
    TransmitterAlreadyInitialized,

    /// The transmitter has been initialized but `create` has not succeeded.
    #[error("transmitter not created")]
    TransmitterNotCreated,

    #[error("transmitter already created")]
    TransmitterAlreadyCreated,

    /// Packet or RTCP builder used before `init`.
    #[error("builder not initialized")]
    BuilderNotInitialized,

    /// Requested maximum packet size is below the RTP minimum.
    #[error("maximum packet size {size} is below the minimum of {min} bytes")]
    PacketSizeTooSmall { size: usize, min: usize },

    /// Requested maximum packet size exceeds what the transport can carry.
    #[error("packet size {size} exceeds the maximum of {max} bytes")]
    PacketSizeTooBig { size: usize, max: usize },

    /// Transmission parameters were tagged with a different protocol than
    /// the transmitter expects.
    #[error("transmission parameters do not match protocol {0}")]
    IllegalParameters(TransmissionProtocol),

    /// The user-defined transmitter factory returned nothing.
    #[error("user-defined transmitter factory returned no transmitter")]
    UserTransmitterMissing,

    #[error("port base must be even, got {0}")]
    PortbaseNotEven(u16),

    /// Address family does not match the transmitter.
    #[error("invalid address type for this transmitter: {0}")]
    InvalidAddressType(std::net::IpAddr),

    /// RTCP scheduler parameter out of range.
    #[error("invalid RTCP scheduler parameter: {0}")]
    SchedulerParameter(&'static str),

    /// Timestamp unit must be strictly positive.
    #[error("invalid timestamp unit: {0}")]
    IllegalTimestampUnit(f64),

    #[error("no local IP addresses could be determined")]
    NoLocalIps,

    /// The poll thread could not be started.
    #[error("failed to spawn poll thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// The transmitter cannot be used from multiple threads.
    #[error("transmitter does not support thread-safe operation")]
    ThreadsNotSupported,

    /// Hash table operation failure.
    #[error("collection error: {0}")]
    Collection(CollectionErrorKind),

    #[error("multicast is not supported by this transmitter")]
    NoMulticastSupport,

    #[error("not a multicast address: {0}")]
    NotMulticastAddress(std::net::IpAddr),

    /// Accept/ignore list operation does not fit the current receive mode.
    #[error("operation not valid in the current receive mode")]
    DifferentReceiveMode,

    /// Accept/ignore list entry to delete does not exist.
    #[error("no such accept/ignore entry")]
    NoSuchEntry,

    /// Caller buffer too small; `required` holds the needed length.
    #[error("buffer too small, {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("already waiting for incoming data")]
    AlreadyWaiting,

    #[error("not waiting for incoming data")]
    NotWaiting,

    #[error("waiting for incoming data is not supported by this transmitter")]
    WaitNotSupported,

    /// Login name could not be determined for the CNAME.
    #[error("cannot determine login name for CNAME")]
    CnameUnavailable,

    /// Blocking transmitter call made while the poll thread owns the transmitter.
    #[error("operation not allowed while the poll thread is running")]
    UsingPollThread,

    /// Built packet would exceed the maximum packet size.
    #[error("packet of {len} bytes exceeds the maximum packet size of {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("no default payload type set")]
    NoDefaultPayloadType,

    #[error("no default marker set")]
    NoDefaultMark,

    #[error("no default timestamp increment set")]
    NoDefaultTimestampIncrement,

    #[error("too many CSRCs (maximum 15)")]
    TooManyCsrcs,

    #[error("CSRC {0:#010X} not in list")]
    CsrcNotInList(u32),

    /// Header extension longer than the 16-bit word count allows.
    #[error("header extension too long")]
    ExtensionTooLong,

    /// Inbound or outbound packet failed structural validation.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    #[error("own SSRC already registered")]
    OwnSsrcExists,

    #[error("no own SSRC registered")]
    NoOwnSsrc,

    #[error("SSRC {0:#010X} already in the source table")]
    SsrcExists(u32),

    #[error("CNAME must not be empty")]
    EmptyCname,
}

/// Specific kind of hash table failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionErrorKind {
    ElementAlreadyExists,
    ElementNotFound,
    KeyAlreadyExists,
    KeyNotFound,
    /// The cursor is not positioned on an element.
    NoCurrentElement,
    /// A configured index function returned a bucket index outside the table.
    InvalidHashIndex,
}

impl fmt::Display for CollectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementAlreadyExists => write!(f, "element already exists"),
            Self::ElementNotFound => write!(f, "element not found"),
            Self::KeyAlreadyExists => write!(f, "key already exists"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::NoCurrentElement => write!(f, "no current element"),
            Self::InvalidHashIndex => write!(f, "index function returned an invalid hash index"),
        }
    }
}

impl From<CollectionErrorKind> for RtpError {
    fn from(kind: CollectionErrorKind) -> Self {
        Self::Collection(kind)
    }
}

/// Convenience alias for `Result<T, RtpError>`.
pub type Result<T> = std::result::Result<T, RtpError>;
