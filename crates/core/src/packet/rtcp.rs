//! RTCP compound packets (RFC 3550 §6).
//!
//! Every RTCP packet starts with the same 4-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  count  |      PT       |             length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `length` is the packet size in 32-bit words minus one. A compound
//! packet is a concatenation of such packets and must begin with an SR
//! or RR (§6.1).

use super::{RTCP_BYE_MAX_REASON_LENGTH, RTCP_SDES_MAX_ITEM_LENGTH, RTP_VERSION};
use crate::error::{Result, RtpError};
use crate::time::NtpTime;

pub const RTCP_SR: u8 = 200;
pub const RTCP_RR: u8 = 201;
pub const RTCP_SDES: u8 = 202;
pub const RTCP_BYE: u8 = 203;
pub const RTCP_APP: u8 = 204;

/// Maximum report blocks in one SR/RR (5-bit count).
pub const MAX_REPORT_BLOCKS: usize = 31;

const REPORT_BLOCK_SIZE: usize = 24;

/// SDES item types (RFC 3550 §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdesItemType {
    Cname = 1,
    Name = 2,
    Email = 3,
    Phone = 4,
    Loc = 5,
    Tool = 6,
    Note = 7,
    Priv = 8,
}

impl SdesItemType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Cname,
            2 => Self::Name,
            3 => Self::Email,
            4 => Self::Phone,
            5 => Self::Loc,
            6 => Self::Tool,
            7 => Self::Note,
            8 => Self::Priv,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: SdesItemType,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

/// Reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24-bit signed on the wire.
    pub packets_lost: i32,
    pub highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

/// Sender information section of an SR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    pub ntp: NtpTime,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport {
        ssrc: u32,
        info: SenderInfo,
        reports: Vec<ReportBlock>,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReportBlock>,
    },
    SourceDescription(Vec<SdesChunk>),
    Goodbye {
        sources: Vec<u32>,
        reason: Vec<u8>,
    },
    App {
        subtype: u8,
        ssrc: u32,
        name: [u8; 4],
        data: Vec<u8>,
    },
    /// Packet type this library does not interpret; body kept verbatim.
    Unknown {
        packet_type: u8,
        count: u8,
        body: Vec<u8>,
    },
}

impl RtcpPacket {
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::SenderReport { .. } => RTCP_SR,
            Self::ReceiverReport { .. } => RTCP_RR,
            Self::SourceDescription(_) => RTCP_SDES,
            Self::Goodbye { .. } => RTCP_BYE,
            Self::App { .. } => RTCP_APP,
            Self::Unknown { packet_type, .. } => *packet_type,
        }
    }

    fn count(&self) -> u8 {
        match self {
            Self::SenderReport { reports, .. } | Self::ReceiverReport { reports, .. } => {
                reports.len() as u8
            }
            Self::SourceDescription(chunks) => chunks.len() as u8,
            Self::Goodbye { sources, .. } => sources.len() as u8,
            Self::App { subtype, .. } => *subtype,
            Self::Unknown { count, .. } => *count,
        }
    }

    fn check_counts(&self) -> Result<()> {
        let too_many = match self {
            Self::SenderReport { reports, .. } | Self::ReceiverReport { reports, .. } => {
                reports.len() > MAX_REPORT_BLOCKS
            }
            Self::SourceDescription(chunks) => chunks.len() > 31,
            Self::Goodbye { sources, .. } => sources.len() > 31,
            Self::App { subtype, .. } => *subtype > 31,
            Self::Unknown { count, .. } => *count > 31,
        };
        if too_many {
            return Err(RtpError::InvalidPacket("RTCP count field overflow"));
        }
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match self {
            Self::SenderReport {
                ssrc,
                info,
                reports,
            } => {
                out.extend_from_slice(&ssrc.to_be_bytes());
                out.extend_from_slice(&info.ntp.seconds.to_be_bytes());
                out.extend_from_slice(&info.ntp.fraction.to_be_bytes());
                out.extend_from_slice(&info.rtp_timestamp.to_be_bytes());
                out.extend_from_slice(&info.packet_count.to_be_bytes());
                out.extend_from_slice(&info.octet_count.to_be_bytes());
                for r in reports {
                    write_report_block(r, out);
                }
            }
            Self::ReceiverReport { ssrc, reports } => {
                out.extend_from_slice(&ssrc.to_be_bytes());
                for r in reports {
                    write_report_block(r, out);
                }
            }
            Self::SourceDescription(chunks) => {
                for chunk in chunks {
                    let start = out.len();
                    out.extend_from_slice(&chunk.ssrc.to_be_bytes());
                    for item in &chunk.items {
                        let len = item.value.len().min(RTCP_SDES_MAX_ITEM_LENGTH);
                        out.push(item.kind as u8);
                        out.push(len as u8);
                        out.extend_from_slice(&item.value[..len]);
                    }
                    // Item list terminator, then pad the chunk to a word boundary.
                    out.push(0);
                    while (out.len() - start) % 4 != 0 {
                        out.push(0);
                    }
                }
            }
            Self::Goodbye { sources, reason } => {
                for ssrc in sources {
                    out.extend_from_slice(&ssrc.to_be_bytes());
                }
                if !reason.is_empty() {
                    let len = reason.len().min(RTCP_BYE_MAX_REASON_LENGTH);
                    out.push(len as u8);
                    out.extend_from_slice(&reason[..len]);
                }
            }
            Self::App {
                ssrc, name, data, ..
            } => {
                out.extend_from_slice(&ssrc.to_be_bytes());
                out.extend_from_slice(name);
                out.extend_from_slice(data);
            }
            Self::Unknown { body, .. } => out.extend_from_slice(body),
        }
    }

    /// Append this packet, header included, to `out`.
    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        self.check_counts()?;
        let start = out.len();
        out.extend_from_slice(&[0; 4]);
        self.write_body(out);
        while (out.len() - start) % 4 != 0 {
            out.push(0);
        }
        let words = (out.len() - start) / 4 - 1;
        if words > u16::MAX as usize {
            return Err(RtpError::InvalidPacket("RTCP packet too long"));
        }
        out[start] = (RTP_VERSION << 6) | self.count();
        out[start + 1] = self.packet_type();
        out[start + 2..start + 4].copy_from_slice(&(words as u16).to_be_bytes());
        Ok(())
    }

    fn parse(packet_type: u8, count: u8, body: &[u8]) -> Result<Self> {
        let count_usize = count as usize;
        Ok(match packet_type {
            RTCP_SR => {
                if body.len() < 24 + count_usize * REPORT_BLOCK_SIZE {
                    return Err(RtpError::InvalidPacket("truncated sender report"));
                }
                let info = SenderInfo {
                    ntp: NtpTime {
                        seconds: read_u32(body, 4),
                        fraction: read_u32(body, 8),
                    },
                    rtp_timestamp: read_u32(body, 12),
                    packet_count: read_u32(body, 16),
                    octet_count: read_u32(body, 20),
                };
                Self::SenderReport {
                    ssrc: read_u32(body, 0),
                    info,
                    reports: read_report_blocks(&body[24..], count_usize),
                }
            }
            RTCP_RR => {
                if body.len() < 4 + count_usize * REPORT_BLOCK_SIZE {
                    return Err(RtpError::InvalidPacket("truncated receiver report"));
                }
                Self::ReceiverReport {
                    ssrc: read_u32(body, 0),
                    reports: read_report_blocks(&body[4..], count_usize),
                }
            }
            RTCP_SDES => Self::SourceDescription(parse_sdes(body, count_usize)?),
            RTCP_BYE => {
                if body.len() < count_usize * 4 {
                    return Err(RtpError::InvalidPacket("truncated BYE"));
                }
                let sources = (0..count_usize).map(|i| read_u32(body, i * 4)).collect();
                let rest = &body[count_usize * 4..];
                let reason = match rest.first() {
                    Some(&len) if rest.len() > len as usize => rest[1..1 + len as usize].to_vec(),
                    Some(&len) if len > 0 => {
                        return Err(RtpError::InvalidPacket("BYE reason exceeds packet"));
                    }
                    _ => Vec::new(),
                };
                Self::Goodbye { sources, reason }
            }
            RTCP_APP => {
                if body.len() < 8 {
                    return Err(RtpError::InvalidPacket("truncated APP packet"));
                }
                Self::App {
                    subtype: count,
                    ssrc: read_u32(body, 0),
                    name: [body[4], body[5], body[6], body[7]],
                    data: body[8..].to_vec(),
                }
            }
            other => Self::Unknown {
                packet_type: other,
                count,
                body: body.to_vec(),
            },
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_report_block(r: &ReportBlock, out: &mut Vec<u8>) {
    out.extend_from_slice(&r.ssrc.to_be_bytes());
    let lost = (r.packets_lost.clamp(-0x80_0000, 0x7F_FFFF) as u32) & 0x00FF_FFFF;
    out.extend_from_slice(&(((r.fraction_lost as u32) << 24) | lost).to_be_bytes());
    out.extend_from_slice(&r.highest_sequence.to_be_bytes());
    out.extend_from_slice(&r.jitter.to_be_bytes());
    out.extend_from_slice(&r.last_sr.to_be_bytes());
    out.extend_from_slice(&r.delay_since_last_sr.to_be_bytes());
}

fn read_report_blocks(buf: &[u8], count: usize) -> Vec<ReportBlock> {
    (0..count)
        .map(|i| {
            let b = &buf[i * REPORT_BLOCK_SIZE..];
            let word = read_u32(b, 4);
            ReportBlock {
                ssrc: read_u32(b, 0),
                fraction_lost: (word >> 24) as u8,
                packets_lost: ((word << 8) as i32) >> 8,
                highest_sequence: read_u32(b, 8),
                jitter: read_u32(b, 12),
                last_sr: read_u32(b, 16),
                delay_since_last_sr: read_u32(b, 20),
            }
        })
        .collect()
}

fn parse_sdes(body: &[u8], count: usize) -> Result<Vec<SdesChunk>> {
    let mut chunks = Vec::with_capacity(count);
    let mut pos = 0;
    for _ in 0..count {
        if pos + 4 > body.len() {
            return Err(RtpError::InvalidPacket("truncated SDES chunk"));
        }
        let start = pos;
        let ssrc = read_u32(body, pos);
        pos += 4;
        let mut items = Vec::new();
        loop {
            let kind = *body
                .get(pos)
                .ok_or(RtpError::InvalidPacket("unterminated SDES chunk"))?;
            if kind == 0 {
                pos += 1;
                break;
            }
            let len = *body
                .get(pos + 1)
                .ok_or(RtpError::InvalidPacket("truncated SDES item"))? as usize;
            if pos + 2 + len > body.len() {
                return Err(RtpError::InvalidPacket("SDES item exceeds packet"));
            }
            if let Some(kind) = SdesItemType::from_u8(kind) {
                items.push(SdesItem {
                    kind,
                    value: body[pos + 2..pos + 2 + len].to_vec(),
                });
            }
            pos += 2 + len;
        }
        while (pos - start) % 4 != 0 {
            pos += 1;
        }
        chunks.push(SdesChunk { ssrc, items });
    }
    Ok(chunks)
}

/// A validated RTCP compound packet together with its wire bytes.
#[derive(Debug, Clone)]
pub struct RtcpCompoundPacket {
    data: Vec<u8>,
    packets: Vec<RtcpPacket>,
}

impl RtcpCompoundPacket {
    /// Serialize `packets` into a compound packet no larger than `max_size`.
    pub fn build(packets: Vec<RtcpPacket>, max_size: usize) -> Result<Self> {
        match packets.first() {
            Some(RtcpPacket::SenderReport { .. }) | Some(RtcpPacket::ReceiverReport { .. }) => {}
            _ => {
                return Err(RtpError::InvalidPacket(
                    "compound packet must start with SR or RR",
                ));
            }
        }
        let mut data = Vec::new();
        for packet in &packets {
            packet.write(&mut data)?;
        }
        if data.len() > max_size {
            return Err(RtpError::PacketTooLarge {
                len: data.len(),
                max: max_size,
            });
        }
        Ok(Self { data, packets })
    }

    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if data.len() - pos < 4 {
                return Err(RtpError::InvalidPacket("truncated RTCP header"));
            }
            let header = &data[pos..pos + 4];
            if header[0] >> 6 != RTP_VERSION {
                return Err(RtpError::InvalidPacket("unsupported RTCP version"));
            }
            let has_padding = header[0] & 0x20 != 0;
            let count = header[0] & 0x1F;
            let packet_type = header[1];
            let len = (u16::from_be_bytes([header[2], header[3]]) as usize + 1) * 4;
            if pos + len > data.len() {
                return Err(RtpError::InvalidPacket("RTCP length exceeds datagram"));
            }

            let mut body_end = pos + len;
            if has_padding {
                let pad = data[body_end - 1] as usize;
                if pad == 0 || pad > len - 4 {
                    return Err(RtpError::InvalidPacket("bad RTCP padding"));
                }
                body_end -= pad;
            }

            if packets.is_empty() && packet_type != RTCP_SR && packet_type != RTCP_RR {
                return Err(RtpError::InvalidPacket(
                    "compound packet must start with SR or RR",
                ));
            }
            packets.push(RtcpPacket::parse(
                packet_type,
                count,
                &data[pos + 4..body_end],
            )?);
            pos += len;
        }
        if packets.is_empty() {
            return Err(RtpError::InvalidPacket("empty RTCP compound packet"));
        }
        Ok(Self { data, packets })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn packets(&self) -> &[RtcpPacket] {
        &self.packets
    }

    pub fn has_bye(&self) -> bool {
        self.packets
            .iter()
            .any(|p| matches!(p, RtcpPacket::Goodbye { .. }))
    }
}
