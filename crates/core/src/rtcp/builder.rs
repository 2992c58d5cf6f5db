use std::time::Instant;

use crate::error::{Result, RtpError};
use crate::packet::rtcp::{
    MAX_REPORT_BLOCKS, RtcpCompoundPacket, RtcpPacket, SdesChunk, SdesItem, SdesItemType,
    SenderInfo,
};
use crate::packet::{
    PacketBuilder, RTCP_BYE_MAX_REASON_LENGTH, RTCP_SDES_MAX_ITEM_LENGTH, RTP_MIN_PACKET_SIZE,
};
use crate::sources::SourceTable;
use crate::time::NtpTime;

const SR_FIXED_SIZE: usize = 28;
const RR_FIXED_SIZE: usize = 8;
const REPORT_BLOCK_SIZE: usize = 24;

/// Optional SDES items, in rotation order.
const OPTIONAL_ITEMS: [SdesItemType; 6] = [
    SdesItemType::Name,
    SdesItemType::Email,
    SdesItemType::Phone,
    SdesItemType::Loc,
    SdesItemType::Tool,
    SdesItemType::Note,
];

/// Assembles the compound packets this session sends.
///
/// Every regular report carries the CNAME plus at most one of the other
/// configured SDES items, cycling through them from report to report.
#[derive(Debug, Default)]
pub struct RtcpBuilder {
    initialized: bool,
    max_packet_size: usize,
    timestamp_unit: f64,
    cname: Vec<u8>,
    optional: [Option<Vec<u8>>; 6],
    rotation: usize,
}

impl RtcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, max_packet_size: usize, timestamp_unit: f64, cname: &[u8]) -> Result<()> {
        if max_packet_size < RTP_MIN_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooSmall {
                size: max_packet_size,
                min: RTP_MIN_PACKET_SIZE,
            });
        }
        if timestamp_unit.is_nan() || timestamp_unit <= 0.0 {
            return Err(RtpError::IllegalTimestampUnit(timestamp_unit));
        }
        if cname.is_empty() {
            return Err(RtpError::EmptyCname);
        }
        *self = Self {
            initialized: true,
            max_packet_size,
            timestamp_unit,
            cname: truncate(cname, RTCP_SDES_MAX_ITEM_LENGTH),
            ..Self::default()
        };
        Ok(())
    }

    pub fn destroy(&mut self) {
        *self = Self::default();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn cname(&self) -> &[u8] {
        &self.cname
    }

    pub fn set_maximum_packet_size(&mut self, size: usize) -> Result<()> {
        self.check_initialized()?;
        if size < RTP_MIN_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooSmall {
                size,
                min: RTP_MIN_PACKET_SIZE,
            });
        }
        self.max_packet_size = size;
        Ok(())
    }

    pub fn set_timestamp_unit(&mut self, unit: f64) -> Result<()> {
        self.check_initialized()?;
        if unit.is_nan() || unit <= 0.0 {
            return Err(RtpError::IllegalTimestampUnit(unit));
        }
        self.timestamp_unit = unit;
        Ok(())
    }

    /// Set or, with an empty value, clear one of the optional local SDES
    /// items. CNAME cannot be changed here.
    pub fn set_local_item(&mut self, kind: SdesItemType, value: &[u8]) -> Result<()> {
        self.check_initialized()?;
        let slot = OPTIONAL_ITEMS
            .iter()
            .position(|k| *k == kind)
            .ok_or(RtpError::InvalidPacket("not an optional SDES item"))?;
        self.optional[slot] = if value.is_empty() {
            None
        } else {
            Some(truncate(value, RTCP_SDES_MAX_ITEM_LENGTH))
        };
        Ok(())
    }

    pub fn set_local_name(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Name, value)
    }

    pub fn set_local_email(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Email, value)
    }

    pub fn set_local_phone(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Phone, value)
    }

    pub fn set_local_location(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Loc, value)
    }

    pub fn set_local_tool(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Tool, value)
    }

    pub fn set_local_note(&mut self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Note, value)
    }

    fn check_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(RtpError::BuilderNotInitialized);
        }
        Ok(())
    }

    fn cname_item(&self) -> SdesItem {
        SdesItem {
            kind: SdesItemType::Cname,
            value: self.cname.clone(),
        }
    }

    fn next_optional_item(&mut self) -> Option<SdesItem> {
        for step in 0..OPTIONAL_ITEMS.len() {
            let idx = (self.rotation + step) % OPTIONAL_ITEMS.len();
            if let Some(value) = &self.optional[idx] {
                self.rotation = (idx + 1) % OPTIONAL_ITEMS.len();
                return Some(SdesItem {
                    kind: OPTIONAL_ITEMS[idx],
                    value: value.clone(),
                });
            }
        }
        None
    }

    fn sender_info(&self, packets: &PacketBuilder, now: Instant) -> SenderInfo {
        // Extrapolate the RTP clock from the last packet to the wallclock
        // instant of the report.
        let rtp_timestamp = match packets.last_sample() {
            Some((ts, at)) => {
                let elapsed = now.saturating_duration_since(at).as_secs_f64();
                ts.wrapping_add((elapsed / self.timestamp_unit).round() as u32)
            }
            None => packets.timestamp(),
        };
        SenderInfo {
            ntp: NtpTime::now(),
            rtp_timestamp,
            packet_count: packets.packet_count(),
            octet_count: packets.payload_octet_count(),
        }
    }

    /// Build the next regular report: SR if the local participant sent
    /// data recently, RR otherwise, followed by the local SDES chunk.
    pub fn build_next_packet(
        &mut self,
        now: Instant,
        packets: &PacketBuilder,
        sources: &mut SourceTable,
    ) -> Result<RtcpCompoundPacket> {
        self.check_initialized()?;
        let ssrc = packets.ssrc();
        let sender = sources.own_source().is_some_and(|s| s.is_sender());

        let mut items = vec![self.cname_item()];
        items.extend(self.next_optional_item());
        let sdes = SdesChunk { ssrc, items };

        let fixed = if sender { SR_FIXED_SIZE } else { RR_FIXED_SIZE };
        let room = self
            .max_packet_size
            .saturating_sub(fixed + sdes_packet_len(&sdes));
        let limit = (room / REPORT_BLOCK_SIZE).min(MAX_REPORT_BLOCKS);
        let reports = sources.report_blocks(now, limit);

        let report = if sender {
            RtcpPacket::SenderReport {
                ssrc,
                info: self.sender_info(packets, now),
                reports,
            }
        } else {
            RtcpPacket::ReceiverReport { ssrc, reports }
        };
        let compound = RtcpCompoundPacket::build(
            vec![report, RtcpPacket::SourceDescription(vec![sdes])],
            self.max_packet_size,
        )?;
        tracing::trace!(len = compound.len(), sender, "built RTCP report");
        Ok(compound)
    }

    /// Build a BYE compound packet for the current local SSRC.
    ///
    /// With `use_sr` set and the local participant an active sender, the
    /// leading report is an SR carrying final sender statistics.
    pub fn build_bye_packet(
        &self,
        now: Instant,
        packets: &PacketBuilder,
        sources: &SourceTable,
        reason: &[u8],
        use_sr: bool,
    ) -> Result<RtcpCompoundPacket> {
        self.check_initialized()?;
        let ssrc = packets.ssrc();
        let sender = sources.own_source().is_some_and(|s| s.is_sender());
        let report = if use_sr && sender {
            RtcpPacket::SenderReport {
                ssrc,
                info: self.sender_info(packets, now),
                reports: Vec::new(),
            }
        } else {
            RtcpPacket::ReceiverReport {
                ssrc,
                reports: Vec::new(),
            }
        };
        RtcpCompoundPacket::build(
            vec![
                report,
                RtcpPacket::SourceDescription(vec![SdesChunk {
                    ssrc,
                    items: vec![self.cname_item()],
                }]),
                RtcpPacket::Goodbye {
                    sources: vec![ssrc],
                    reason: truncate(reason, RTCP_BYE_MAX_REASON_LENGTH),
                },
            ],
            self.max_packet_size,
        )
    }
}

fn truncate(value: &[u8], max: usize) -> Vec<u8> {
    value[..value.len().min(max)].to_vec()
}

/// Wire size of an SDES packet holding `chunk`.
fn sdes_packet_len(chunk: &SdesChunk) -> usize {
    let items: usize = chunk.items.iter().map(|i| 2 + i.value.len()).sum();
    4 + (4 + items + 1).div_ceil(4) * 4
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};

    use super::*;
    use crate::packet::RawPacket;
    use crate::rtcp::RtcpScheduler;
    use crate::transmitter::{
        FakeTransmissionParams, FakeTransmitter, TransmissionParams, Transmitter,
    };

    fn setup() -> (RtcpBuilder, PacketBuilder, SourceTable) {
        let mut packets = PacketBuilder::new();
        packets.init(1400).unwrap();
        let mut sources = SourceTable::new();
        sources.create_own_ssrc(packets.ssrc()).unwrap();
        let mut rtcp = RtcpBuilder::new();
        rtcp.init(1400, 1.0 / 8000.0, b"user@host").unwrap();
        (rtcp, packets, sources)
    }

    fn sdes_items(packet: &RtcpCompoundPacket) -> Vec<SdesItemType> {
        packet
            .packets()
            .iter()
            .find_map(|p| match p {
                RtcpPacket::SourceDescription(chunks) => {
                    Some(chunks[0].items.iter().map(|i| i.kind).collect())
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn init_validates() {
        let mut rtcp = RtcpBuilder::new();
        assert!(matches!(
            rtcp.init(1400, 0.0, b"a@b"),
            Err(RtpError::IllegalTimestampUnit(_))
        ));
        assert!(matches!(rtcp.init(1400, 0.1, b""), Err(RtpError::EmptyCname)));
        assert!(matches!(
            rtcp.init(100, 0.1, b"a@b"),
            Err(RtpError::PacketSizeTooSmall { .. })
        ));
        assert!(!rtcp.is_initialized());
        rtcp.init(1400, 0.1, &[b'x'; 300]).unwrap();
        assert_eq!(rtcp.cname().len(), 255);
    }

    #[test]
    fn receiver_report_until_sending() {
        let (mut rtcp, mut packets, mut sources) = setup();
        let now = Instant::now();
        let rr = rtcp.build_next_packet(now, &packets, &mut sources).unwrap();
        assert!(matches!(rr.packets()[0], RtcpPacket::ReceiverReport { .. }));

        packets.build_packet(b"abc", 0, false, 160).unwrap();
        sources.sent_rtp_packet();
        let sr = rtcp.build_next_packet(now, &packets, &mut sources).unwrap();
        match &sr.packets()[0] {
            RtcpPacket::SenderReport { ssrc, info, .. } => {
                assert_eq!(*ssrc, packets.ssrc());
                assert_eq!(info.packet_count, 1);
                assert_eq!(info.octet_count, 3);
            }
            other => panic!("expected SR, got {other:?}"),
        }
    }

    #[test]
    fn optional_items_rotate() {
        let (mut rtcp, packets, mut sources) = setup();
        rtcp.set_local_name(b"Alice").unwrap();
        rtcp.set_local_tool(b"rtpsession").unwrap();
        let now = Instant::now();
        let kinds: Vec<Vec<SdesItemType>> = (0..3)
            .map(|_| sdes_items(&rtcp.build_next_packet(now, &packets, &mut sources).unwrap()))
            .collect();
        assert_eq!(kinds[0], vec![SdesItemType::Cname, SdesItemType::Name]);
        assert_eq!(kinds[1], vec![SdesItemType::Cname, SdesItemType::Tool]);
        assert_eq!(kinds[2], vec![SdesItemType::Cname, SdesItemType::Name]);

        rtcp.set_local_name(b"").unwrap();
        rtcp.set_local_tool(b"").unwrap();
        let only = rtcp.build_next_packet(now, &packets, &mut sources).unwrap();
        assert_eq!(sdes_items(&only), vec![SdesItemType::Cname]);
        assert!(rtcp.set_local_item(SdesItemType::Cname, b"x").is_err());
    }

    #[test]
    fn bye_packet_layout() {
        let (rtcp, packets, sources) = setup();
        let long_reason = [b'r'; 400];
        let bye = rtcp
            .build_bye_packet(Instant::now(), &packets, &sources, &long_reason, true)
            .unwrap();
        assert!(bye.has_bye());
        assert!(matches!(bye.packets()[0], RtcpPacket::ReceiverReport { .. }));
        match &bye.packets()[2] {
            RtcpPacket::Goodbye { sources, reason } => {
                assert_eq!(sources, &vec![packets.ssrc()]);
                assert_eq!(reason.len(), RTCP_BYE_MAX_REASON_LENGTH);
            }
            other => panic!("expected BYE, got {other:?}"),
        }
        RtcpCompoundPacket::parse(bye.data().to_vec()).unwrap();
    }

    #[test]
    fn reports_on_remote_sender() {
        let (mut rtcp, packets, mut sources) = setup();

        let fake = FakeTransmitter::new();
        fake.init(false).unwrap();
        let mut params = FakeTransmissionParams::new(5000);
        params.local_ips = vec!["10.0.0.1".parse().unwrap()];
        fake.create(1400, &TransmissionParams::Fake(params)).unwrap();
        let mut scheduler = RtcpScheduler::new(28);

        let mut remote = PacketBuilder::new();
        remote.init(1400).unwrap();
        let from = SocketAddr::new(IpAddr::from([10, 0, 0, 2]), 7000);
        for _ in 0..3 {
            remote.build_packet(b"media", 96, false, 160).unwrap();
            let raw = RawPacket::new(remote.packet().to_vec(), from, true);
            sources
                .process_raw_packet(raw, &fake, false, &mut scheduler)
                .unwrap();
        }

        let report = rtcp
            .build_next_packet(Instant::now(), &packets, &mut sources)
            .unwrap();
        match &report.packets()[0] {
            RtcpPacket::ReceiverReport { reports, .. } => {
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].ssrc, remote.ssrc());
                assert_eq!(reports[0].packets_lost, 0);
            }
            other => panic!("expected RR, got {other:?}"),
        }

        // Nothing new since the last report.
        let next = rtcp
            .build_next_packet(Instant::now(), &packets, &mut sources)
            .unwrap();
        match &next.packets()[0] {
            RtcpPacket::ReceiverReport { reports, .. } => assert!(reports.is_empty()),
            other => panic!("expected RR, got {other:?}"),
        }
    }

    #[test]
    fn sdes_length_matches_wire() {
        let chunk = SdesChunk {
            ssrc: 1,
            items: vec![SdesItem {
                kind: SdesItemType::Cname,
                value: b"user@host".to_vec(),
            }],
        };
        let mut out = Vec::new();
        RtcpPacket::SourceDescription(vec![chunk.clone()])
            .write(&mut out)
            .unwrap();
        assert_eq!(out.len(), sdes_packet_len(&chunk));
    }
}
