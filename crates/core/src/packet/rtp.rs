use std::time::Instant;

use rand::Rng;

use super::{RTP_HEADER_SIZE, RTP_MAX_CSRCS, RTP_MIN_PACKET_SIZE, RTP_VERSION};
use crate::error::{Result, RtpError};

/// RTCP SR and RR packet types as they appear in the second header byte.
const RTCP_SR_BYTE: u8 = 200;
const RTCP_RR_BYTE: u8 = 201;

/// Header extension carried after the CSRC list (RFC 3550 §5.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    pub id: u16,
    pub data: Vec<u8>,
}

/// A parsed RTP data packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                  CSRC list (0-15 items)                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The packet keeps its original bytes; [`payload`](Self::payload) is a
/// view into them with CSRCs, extension and padding stripped.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    data: Vec<u8>,
    payload_type: u8,
    marker: bool,
    sequence: u16,
    extended_sequence: u32,
    timestamp: u32,
    ssrc: u32,
    csrcs: Vec<u32>,
    extension: Option<HeaderExtension>,
    payload_start: usize,
    payload_end: usize,
    receive_time: Instant,
}

impl RtpPacket {
    pub fn parse(data: Vec<u8>, receive_time: Instant) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(RtpError::InvalidPacket("RTP packet shorter than header"));
        }
        if data[0] >> 6 != RTP_VERSION {
            return Err(RtpError::InvalidPacket("unsupported RTP version"));
        }
        if data[1] == RTCP_SR_BYTE || data[1] == RTCP_RR_BYTE {
            return Err(RtpError::InvalidPacket("RTCP report on the RTP channel"));
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE;
        let mut payload_end = data.len();

        if has_padding {
            let pad = data[data.len() - 1] as usize;
            if pad == 0 || pad > data.len() - offset {
                return Err(RtpError::InvalidPacket("bad RTP padding length"));
            }
            payload_end -= pad;
        }

        if offset + csrc_count * 4 > payload_end {
            return Err(RtpError::InvalidPacket("CSRC list exceeds packet"));
        }
        let csrcs = data[offset..offset + csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_count * 4;

        let extension = if has_extension {
            if offset + 4 > payload_end {
                return Err(RtpError::InvalidPacket("truncated header extension"));
            }
            let id = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;
            if offset + words * 4 > payload_end {
                return Err(RtpError::InvalidPacket("header extension exceeds packet"));
            }
            let ext = HeaderExtension {
                id,
                data: data[offset..offset + words * 4].to_vec(),
            };
            offset += words * 4;
            Some(ext)
        } else {
            None
        };

        Ok(Self {
            data,
            payload_type,
            marker,
            sequence,
            extended_sequence: sequence as u32,
            timestamp,
            ssrc,
            csrcs,
            extension,
            payload_start: offset,
            payload_end,
            receive_time,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload_start..self.payload_end]
    }

    /// The packet as received, including header and padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn marker(&self) -> bool {
        self.marker
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Sequence number extended with the receiver's cycle count.
    pub fn extended_sequence(&self) -> u32 {
        self.extended_sequence
    }

    pub(crate) fn set_extended_sequence(&mut self, seq: u32) {
        self.extended_sequence = seq;
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn csrcs(&self) -> &[u32] {
        &self.csrcs
    }

    pub fn extension(&self) -> Option<&HeaderExtension> {
        self.extension.as_ref()
    }

    pub fn receive_time(&self) -> Instant {
        self.receive_time
    }
}

/// Outbound RTP packet builder.
///
/// Owns the local SSRC together with the sequence number and timestamp
/// state that follow it. The SSRC, initial sequence number and initial
/// timestamp are all random (RFC 3550 §5.1, §8.1) and are re-rolled by
/// [`create_new_ssrc`](Self::create_new_ssrc) after a collision.
///
/// Sender statistics (packet and payload octet counts, last timestamp
/// and the instant it was sampled) feed RTCP sender reports.
#[derive(Debug)]
pub struct PacketBuilder {
    initialized: bool,
    max_packet_size: usize,
    buffer: Vec<u8>,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    csrcs: Vec<u32>,
    default_payload_type: Option<u8>,
    default_mark: Option<bool>,
    default_timestamp_increment: Option<u32>,
    packet_count: u32,
    payload_octet_count: u32,
    last_timestamp: u32,
    last_packet_time: Option<Instant>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self {
            initialized: false,
            max_packet_size: 0,
            buffer: Vec::new(),
            ssrc: 0,
            sequence: 0,
            timestamp: 0,
            csrcs: Vec::new(),
            default_payload_type: None,
            default_mark: None,
            default_timestamp_increment: None,
            packet_count: 0,
            payload_octet_count: 0,
            last_timestamp: 0,
            last_packet_time: None,
        }
    }

    /// Prepare the builder with a fresh random SSRC.
    pub fn init(&mut self, max_packet_size: usize) -> Result<()> {
        if max_packet_size < RTP_MIN_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooSmall {
                size: max_packet_size,
                min: RTP_MIN_PACKET_SIZE,
            });
        }
        self.max_packet_size = max_packet_size;
        self.buffer = Vec::with_capacity(max_packet_size);
        self.csrcs.clear();
        self.default_payload_type = None;
        self.default_mark = None;
        self.default_timestamp_increment = None;
        self.initialized = true;
        self.create_new_ssrc(|_| false);
        Ok(())
    }

    pub fn destroy(&mut self) {
        *self = Self::new();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_maximum_packet_size(&mut self, max_packet_size: usize) -> Result<()> {
        if !self.initialized {
            return Err(RtpError::BuilderNotInitialized);
        }
        if max_packet_size < RTP_MIN_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooSmall {
                size: max_packet_size,
                min: RTP_MIN_PACKET_SIZE,
            });
        }
        self.max_packet_size = max_packet_size;
        Ok(())
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Pick a new random SSRC for which `in_use` returns false, and
    /// re-randomise sequence number and timestamp. Sender statistics restart.
    pub fn create_new_ssrc(&mut self, in_use: impl Fn(u32) -> bool) -> u32 {
        let mut rng = rand::rng();
        let mut ssrc = rng.random::<u32>();
        while in_use(ssrc) {
            ssrc = rng.random::<u32>();
        }
        self.ssrc = ssrc;
        self.sequence = rng.random::<u16>();
        self.timestamp = rng.random::<u32>();
        self.packet_count = 0;
        self.payload_octet_count = 0;
        self.last_packet_time = None;
        tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "new local SSRC");
        ssrc
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp the next packet will carry.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn set_default_payload_type(&mut self, pt: u8) -> Result<()> {
        check_payload_type(pt)?;
        self.default_payload_type = Some(pt);
        Ok(())
    }

    pub fn set_default_mark(&mut self, mark: bool) {
        self.default_mark = Some(mark);
    }

    pub fn set_default_timestamp_increment(&mut self, increment: u32) {
        self.default_timestamp_increment = Some(increment);
    }

    pub fn increment_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }

    pub fn increment_timestamp_default(&mut self) -> Result<()> {
        let inc = self
            .default_timestamp_increment
            .ok_or(RtpError::NoDefaultTimestampIncrement)?;
        self.increment_timestamp(inc);
        Ok(())
    }

    pub fn add_csrc(&mut self, csrc: u32) -> Result<()> {
        if self.csrcs.len() >= RTP_MAX_CSRCS {
            return Err(RtpError::TooManyCsrcs);
        }
        if !self.csrcs.contains(&csrc) {
            self.csrcs.push(csrc);
        }
        Ok(())
    }

    pub fn delete_csrc(&mut self, csrc: u32) -> Result<()> {
        let pos = self
            .csrcs
            .iter()
            .position(|c| *c == csrc)
            .ok_or(RtpError::CsrcNotInList(csrc))?;
        self.csrcs.remove(pos);
        Ok(())
    }

    pub fn clear_csrc_list(&mut self) {
        self.csrcs.clear();
    }

    /// Build a packet using the configured defaults.
    pub fn build_packet_default(&mut self, payload: &[u8]) -> Result<()> {
        let pt = self
            .default_payload_type
            .ok_or(RtpError::NoDefaultPayloadType)?;
        let mark = self.default_mark.ok_or(RtpError::NoDefaultMark)?;
        let inc = self
            .default_timestamp_increment
            .ok_or(RtpError::NoDefaultTimestampIncrement)?;
        self.build(payload, pt, mark, inc, None)
    }

    pub fn build_packet(
        &mut self,
        payload: &[u8],
        pt: u8,
        mark: bool,
        timestamp_increment: u32,
    ) -> Result<()> {
        self.build(payload, pt, mark, timestamp_increment, None)
    }

    /// Build a packet carrying a header extension of `extension_words`
    /// 32-bit words.
    pub fn build_packet_ex(
        &mut self,
        payload: &[u8],
        pt: u8,
        mark: bool,
        timestamp_increment: u32,
        extension_id: u16,
        extension_words: &[u32],
    ) -> Result<()> {
        if extension_words.len() > u16::MAX as usize {
            return Err(RtpError::ExtensionTooLong);
        }
        self.build(
            payload,
            pt,
            mark,
            timestamp_increment,
            Some((extension_id, extension_words)),
        )
    }

    fn build(
        &mut self,
        payload: &[u8],
        pt: u8,
        mark: bool,
        timestamp_increment: u32,
        extension: Option<(u16, &[u32])>,
    ) -> Result<()> {
        if !self.initialized {
            return Err(RtpError::BuilderNotInitialized);
        }
        check_payload_type(pt)?;
        if mark && (pt == RTCP_SR_BYTE & 0x7F || pt == RTCP_RR_BYTE & 0x7F) {
            return Err(RtpError::InvalidPacket(
                "payload type would be mistaken for RTCP",
            ));
        }

        let ext_len = extension.map_or(0, |(_, words)| 4 + words.len() * 4);
        let len = RTP_HEADER_SIZE + self.csrcs.len() * 4 + ext_len + payload.len();
        if len > self.max_packet_size {
            return Err(RtpError::PacketTooLarge {
                len,
                max: self.max_packet_size,
            });
        }

        let first_byte =
            (RTP_VERSION << 6) | ((extension.is_some() as u8) << 4) | self.csrcs.len() as u8;
        let second_byte = ((mark as u8) << 7) | pt;

        self.buffer.clear();
        self.buffer.push(first_byte);
        self.buffer.push(second_byte);
        self.buffer.extend_from_slice(&self.sequence.to_be_bytes());
        self.buffer.extend_from_slice(&self.timestamp.to_be_bytes());
        self.buffer.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrcs {
            self.buffer.extend_from_slice(&csrc.to_be_bytes());
        }
        if let Some((id, words)) = extension {
            self.buffer.extend_from_slice(&id.to_be_bytes());
            self.buffer
                .extend_from_slice(&(words.len() as u16).to_be_bytes());
            for w in words {
                self.buffer.extend_from_slice(&w.to_be_bytes());
            }
        }
        self.buffer.extend_from_slice(payload);

        self.last_timestamp = self.timestamp;
        self.last_packet_time = Some(Instant::now());
        self.packet_count = self.packet_count.wrapping_add(1);
        self.payload_octet_count = self.payload_octet_count.wrapping_add(payload.len() as u32);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(timestamp_increment);
        Ok(())
    }

    /// The most recently built packet.
    pub fn packet(&self) -> &[u8] {
        &self.buffer
    }

    pub fn packet_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn payload_octet_count(&self) -> u32 {
        self.payload_octet_count
    }

    /// Timestamp of the last built packet and when it was built.
    pub fn last_sample(&self) -> Option<(u32, Instant)> {
        self.last_packet_time.map(|t| (self.last_timestamp, t))
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_payload_type(pt: u8) -> Result<()> {
    if pt > 127 {
        return Err(RtpError::InvalidPacket("payload type above 127"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_builder() -> PacketBuilder {
        let mut b = PacketBuilder::new();
        b.init(1500).unwrap();
        b
    }

    #[test]
    fn version_is_2() {
        let mut b = make_builder();
        b.build_packet(b"abc", 96, false, 160).unwrap();
        assert_eq!(b.packet()[0] >> 6, 2);
    }

    #[test]
    fn marker_and_payload_type() {
        let mut b = make_builder();
        b.build_packet(b"x", 96, true, 0).unwrap();
        assert_eq!(b.packet()[1], 0x80 | 96);
    }

    #[test]
    fn header_plus_payload_length() {
        let mut b = make_builder();
        b.build_packet(b"abc", 0, false, 160).unwrap();
        assert_eq!(b.packet_len(), RTP_HEADER_SIZE + 3);
        assert_eq!(&b.packet()[RTP_HEADER_SIZE..], b"abc");
    }

    #[test]
    fn sequence_and_timestamp_advance() {
        let mut b = make_builder();
        let seq = b.sequence();
        let ts = b.timestamp();
        b.build_packet(b"a", 0, false, 160).unwrap();
        let pkt = b.packet();
        assert_eq!(u16::from_be_bytes([pkt[2], pkt[3]]), seq);
        assert_eq!(u32::from_be_bytes([pkt[4], pkt[5], pkt[6], pkt[7]]), ts);
        assert_eq!(b.sequence(), seq.wrapping_add(1));
        assert_eq!(b.timestamp(), ts.wrapping_add(160));
    }

    #[test]
    fn sequence_wraps() {
        let mut b = make_builder();
        b.sequence = u16::MAX;
        b.build_packet(b"a", 0, false, 0).unwrap();
        assert_eq!(b.sequence(), 0);
    }

    #[test]
    fn csrcs_written_and_parsed() {
        let mut b = make_builder();
        b.add_csrc(0x1111).unwrap();
        b.add_csrc(0x2222).unwrap();
        b.build_packet(b"payload", 8, false, 0).unwrap();
        let pkt = RtpPacket::parse(b.packet().to_vec(), Instant::now()).unwrap();
        assert_eq!(pkt.csrcs(), &[0x1111, 0x2222]);
        assert_eq!(pkt.payload(), b"payload");
        assert_eq!(pkt.ssrc(), b.ssrc());
    }

    #[test]
    fn extension_parsed() {
        let mut b = make_builder();
        b.build_packet_ex(b"pl", 96, false, 0, 0xBEDE, &[0xDEADBEEF])
            .unwrap();
        let pkt = RtpPacket::parse(b.packet().to_vec(), Instant::now()).unwrap();
        let ext = pkt.extension().unwrap();
        assert_eq!(ext.id, 0xBEDE);
        assert_eq!(ext.data, 0xDEADBEEFu32.to_be_bytes());
        assert_eq!(pkt.payload(), b"pl");
    }

    #[test]
    fn oversize_packet_rejected() {
        let mut b = PacketBuilder::new();
        b.init(RTP_MIN_PACKET_SIZE).unwrap();
        let payload = vec![0u8; RTP_MIN_PACKET_SIZE];
        let seq = b.sequence();
        assert!(matches!(
            b.build_packet(&payload, 0, false, 0),
            Err(RtpError::PacketTooLarge { .. })
        ));
        assert_eq!(b.sequence(), seq);
        assert_eq!(b.packet_count(), 0);
    }

    #[test]
    fn defaults_required() {
        let mut b = make_builder();
        assert!(matches!(
            b.build_packet_default(b"a"),
            Err(RtpError::NoDefaultPayloadType)
        ));
        b.set_default_payload_type(0).unwrap();
        b.set_default_mark(false);
        b.set_default_timestamp_increment(80);
        b.build_packet_default(b"a").unwrap();
        assert_eq!(b.packet_count(), 1);
    }

    #[test]
    fn new_ssrc_avoids_taken_values() {
        let mut b = make_builder();
        let old = b.ssrc();
        let new = b.create_new_ssrc(|s| s == old);
        assert_ne!(new, old);
        assert_eq!(b.ssrc(), new);
    }

    #[test]
    fn parse_rejects_rtcp_on_rtp_channel() {
        let mut data = vec![0u8; 28];
        data[0] = 0x80;
        data[1] = 200;
        assert!(RtpPacket::parse(data, Instant::now()).is_err());
    }

    #[test]
    fn parse_strips_padding() {
        let mut data = vec![0xA0, 96, 0, 1, 0, 0, 0, 1, 0, 0, 0, 9];
        data.extend_from_slice(b"hi");
        data.extend_from_slice(&[0, 2]);
        let pkt = RtpPacket::parse(data, Instant::now()).unwrap();
        assert_eq!(pkt.payload(), b"hi");
    }

    #[test]
    fn parse_rejects_truncated() {
        assert!(RtpPacket::parse(vec![0x80, 0, 0], Instant::now()).is_err());
        let mut data = vec![0x82, 96, 0, 1, 0, 0, 0, 1, 0, 0, 0, 9];
        data.extend_from_slice(&[0, 0, 0, 1]);
        assert!(RtpPacket::parse(data, Instant::now()).is_err());
    }
}
