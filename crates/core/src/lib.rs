pub mod collections;
pub mod error;
pub mod handler;
pub mod packet;
pub mod rtcp;
pub mod session;
pub mod sources;
pub mod time;
pub mod transmitter;

pub use error::{Result, RtpError};
pub use handler::{NoopHandler, SessionHandler};
pub use packet::{RawPacket, RtpPacket};
pub use session::{RtpSession, SessionParams, SourceAccess, TransmitterFactory};
pub use sources::{SourceData, SourceTable};
pub use transmitter::{
    Destination, FakeTransmissionParams, FakeTransmitter, ReceiveMode, TransmissionInfo,
    TransmissionParams, TransmissionProtocol, Transmitter, UdpTransmissionParams, UdpTransmitter,
};
