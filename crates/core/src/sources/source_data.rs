use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::packet::RtpPacket;
use crate::packet::rtcp::{ReportBlock, SdesItemType, SenderInfo};
use crate::time;

/// Sequence jump beyond which a packet is treated as a restart (RFC 3550 A.1).
const MAX_DROPOUT: u16 = 3000;
const MAX_MISORDER: u16 = 100;
const SEQ_MOD: u32 = 1 << 16;

/// Where packets claiming an SSRC have been arriving from.
///
/// `Own` marks traffic that originated in this session's transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAddress {
    Own,
    Remote(SocketAddr),
}

impl SenderAddress {
    fn same_host(&self, other: &SenderAddress) -> bool {
        match (self, other) {
            (Self::Own, Self::Own) => true,
            (Self::Remote(a), Self::Remote(b)) => a.ip() == b.ip(),
            _ => false,
        }
    }
}

/// SDES items last received from a participant.
#[derive(Debug, Clone, Default)]
pub struct SdesInfo {
    pub cname: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub email: Option<Vec<u8>>,
    pub phone: Option<Vec<u8>>,
    pub location: Option<Vec<u8>>,
    pub tool: Option<Vec<u8>>,
    pub note: Option<Vec<u8>>,
}

/// Reception statistics for one sender (RFC 3550 A.1, A.3, A.8).
#[derive(Debug, Clone, Default)]
pub(crate) struct ReceptionStats {
    initialized: bool,
    base_seq: u32,
    max_seq: u16,
    bad_seq: u32,
    cycles: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
    jitter: f64,
    last_transit: Option<(f64, u32)>,
}

impl ReceptionStats {
    fn restart(&mut self, seq: u16) {
        self.initialized = true;
        self.base_seq = seq as u32;
        self.max_seq = seq;
        self.bad_seq = SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
        self.expected_prior = 0;
        self.received_prior = 0;
    }

    /// Account for `seq`; returns the extended sequence number, or `None`
    /// when the packet should be dropped as an unexplained jump.
    fn update_sequence(&mut self, seq: u16) -> Option<u32> {
        if !self.initialized {
            self.restart(seq);
        } else {
            let delta = seq.wrapping_sub(self.max_seq);
            if delta < MAX_DROPOUT {
                if seq < self.max_seq {
                    self.cycles = self.cycles.wrapping_add(SEQ_MOD);
                }
                self.max_seq = seq;
            } else if delta as u32 <= SEQ_MOD - MAX_MISORDER as u32 {
                if seq as u32 == self.bad_seq {
                    // Two sequential packets after a jump: the sender restarted.
                    self.restart(seq);
                } else {
                    self.bad_seq = (seq as u32 + 1) & (SEQ_MOD - 1);
                    return None;
                }
            }
        }
        self.received = self.received.wrapping_add(1);
        let cycles = if seq > self.max_seq && seq.wrapping_sub(self.max_seq) > MAX_DROPOUT {
            // Late packet from before the last wrap.
            self.cycles.saturating_sub(SEQ_MOD)
        } else {
            self.cycles
        };
        Some(cycles.wrapping_add(seq as u32))
    }

    fn update_jitter(&mut self, arrival_units: f64, rtp_timestamp: u32) {
        if let Some((prev_arrival, prev_ts)) = self.last_transit {
            let ts_delta = rtp_timestamp.wrapping_sub(prev_ts) as i32 as f64;
            let d = ((arrival_units - prev_arrival) - ts_delta).abs();
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some((arrival_units, rtp_timestamp));
    }

    fn extended_max(&self) -> u32 {
        self.cycles.wrapping_add(self.max_seq as u32)
    }

    /// Fill the loss fields of a report block and start a new interval.
    fn fill_report(&mut self, block: &mut ReportBlock) {
        let extended_max = self.extended_max();
        let expected = extended_max.wrapping_sub(self.base_seq).wrapping_add(1);
        let lost = expected as i64 - self.received as i64;

        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;
        let lost_interval = expected_interval as i64 - received_interval as i64;

        block.fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        };
        block.packets_lost = lost.clamp(-0x80_0000, 0x7F_FFFF) as i32;
        block.highest_sequence = extended_max;
        block.jitter = self.jitter as u32;
    }
}

/// Everything known about one participant, keyed by SSRC in the
/// [`SourceTable`](super::SourceTable).
#[derive(Debug)]
pub struct SourceData {
    ssrc: u32,
    own: bool,
    csrc: bool,
    validated: bool,
    sender: bool,
    pub(crate) rtp_addr: Option<SenderAddress>,
    pub(crate) rtcp_addr: Option<SenderAddress>,
    packets: VecDeque<RtpPacket>,
    pub(crate) stats: ReceptionStats,
    received_since_report: bool,
    sender_info: Option<(SenderInfo, Instant)>,
    report_for_us: Option<(ReportBlock, Instant)>,
    sdes: SdesInfo,
    note_time: Option<Instant>,
    bye: Option<(Vec<u8>, Instant)>,
    last_rtp_time: Option<Instant>,
    last_activity: Instant,
}

impl SourceData {
    pub(crate) fn new(ssrc: u32, now: Instant) -> Self {
        Self {
            ssrc,
            own: false,
            csrc: false,
            validated: false,
            sender: false,
            rtp_addr: None,
            rtcp_addr: None,
            packets: VecDeque::new(),
            stats: ReceptionStats::default(),
            received_since_report: false,
            sender_info: None,
            report_for_us: None,
            sdes: SdesInfo::default(),
            note_time: None,
            bye: None,
            last_rtp_time: None,
            last_activity: now,
        }
    }

    pub(crate) fn new_own(ssrc: u32, now: Instant) -> Self {
        let mut data = Self::new(ssrc, now);
        data.own = true;
        data.validated = true;
        data.rtp_addr = Some(SenderAddress::Own);
        data.rtcp_addr = Some(SenderAddress::Own);
        data
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn is_own(&self) -> bool {
        self.own
    }

    /// Known only from the CSRC list of another source's packets.
    pub fn is_csrc(&self) -> bool {
        self.csrc
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Validated and has not said BYE.
    pub fn is_active(&self) -> bool {
        self.validated && self.bye.is_none()
    }

    pub fn is_sender(&self) -> bool {
        self.sender
    }

    pub fn has_data(&self) -> bool {
        self.validated && !self.packets.is_empty()
    }

    pub fn rtp_address(&self) -> Option<SocketAddr> {
        match self.rtp_addr {
            Some(SenderAddress::Remote(addr)) => Some(addr),
            _ => None,
        }
    }

    pub fn rtcp_address(&self) -> Option<SocketAddr> {
        match self.rtcp_addr {
            Some(SenderAddress::Remote(addr)) => Some(addr),
            _ => None,
        }
    }

    pub fn sdes(&self) -> &SdesInfo {
        &self.sdes
    }

    pub fn cname(&self) -> Option<&[u8]> {
        self.sdes.cname.as_deref()
    }

    /// Last sender report received from this source.
    pub fn sender_info(&self) -> Option<&SenderInfo> {
        self.sender_info.as_ref().map(|(info, _)| info)
    }

    /// Last reception report this source sent about the local SSRC.
    pub fn report_for_us(&self) -> Option<&ReportBlock> {
        self.report_for_us.as_ref().map(|(block, _)| block)
    }

    pub fn bye_reason(&self) -> Option<&[u8]> {
        self.bye.as_ref().map(|(reason, _)| reason.as_slice())
    }

    pub fn received_bye(&self) -> bool {
        self.bye.is_some()
    }

    pub fn packets_received(&self) -> u32 {
        self.stats.received
    }

    /// Interarrival jitter in RTP timestamp units.
    pub fn jitter(&self) -> f64 {
        self.stats.jitter
    }

    pub fn queued_packets(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn next_packet(&mut self) -> Option<RtpPacket> {
        self.packets.pop_front()
    }

    pub(crate) fn flush_packets(&mut self) {
        self.packets.clear();
    }

    pub(crate) fn mark_csrc(&mut self) {
        self.csrc = true;
        self.validated = true;
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub(crate) fn mark_rtcp_seen(&mut self, now: Instant) {
        self.validated = true;
        self.last_activity = now;
    }

    /// Record an RTP packet. Returns false when the packet was dropped.
    pub(crate) fn process_rtp(
        &mut self,
        mut packet: RtpPacket,
        arrival_units: f64,
        store: bool,
    ) -> bool {
        let Some(extended) = self.stats.update_sequence(packet.sequence()) else {
            return false;
        };
        packet.set_extended_sequence(extended);
        self.stats.update_jitter(arrival_units, packet.timestamp());

        let now = packet.receive_time();
        self.validated = true;
        self.sender = true;
        self.received_since_report = true;
        self.last_rtp_time = Some(now);
        self.last_activity = now;
        if store {
            self.packets.push_back(packet);
        }
        true
    }

    pub(crate) fn sent_rtp_packet(&mut self, now: Instant) {
        self.sender = true;
        self.last_rtp_time = Some(now);
        self.last_activity = now;
    }

    pub(crate) fn set_sender_info(&mut self, info: SenderInfo, now: Instant) {
        self.sender_info = Some((info, now));
        self.mark_rtcp_seen(now);
    }

    pub(crate) fn set_report_for_us(&mut self, block: ReportBlock, now: Instant) {
        self.report_for_us = Some((block, now));
    }

    /// Store an SDES item. The first CNAME sticks: a different one is
    /// refused and `false` returned.
    pub(crate) fn set_sdes_item(&mut self, kind: SdesItemType, value: Vec<u8>, now: Instant) -> bool {
        let slot = match kind {
            SdesItemType::Cname => {
                if let Some(cname) = &self.sdes.cname {
                    return *cname == value;
                }
                &mut self.sdes.cname
            }
            SdesItemType::Name => &mut self.sdes.name,
            SdesItemType::Email => &mut self.sdes.email,
            SdesItemType::Phone => &mut self.sdes.phone,
            SdesItemType::Loc => &mut self.sdes.location,
            SdesItemType::Tool => &mut self.sdes.tool,
            SdesItemType::Note => {
                self.note_time = Some(now);
                &mut self.sdes.note
            }
            SdesItemType::Priv => return true,
        };
        *slot = Some(value);
        true
    }

    pub(crate) fn set_bye(&mut self, reason: Vec<u8>, now: Instant) {
        self.bye = Some((reason, now));
        self.last_activity = now;
    }

    /// Build the reception report block for this source, if it sent data
    /// since the previous report.
    pub(crate) fn take_report_block(&mut self, now: Instant) -> Option<ReportBlock> {
        if !self.received_since_report {
            return None;
        }
        self.received_since_report = false;
        let mut block = ReportBlock {
            ssrc: self.ssrc,
            ..ReportBlock::default()
        };
        self.stats.fill_report(&mut block);
        if let Some((info, received)) = &self.sender_info {
            block.last_sr = info.ntp.compact();
            block.delay_since_last_sr = time::to_compact_duration(now.duration_since(*received));
        }
        Some(block)
    }

    pub(crate) fn bye_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        matches!(&self.bye, Some((_, at)) if now.duration_since(*at) > timeout)
    }

    pub(crate) fn inactive_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_activity)
    }

    pub(crate) fn expire_sender(&mut self, now: Instant, timeout: Duration) {
        if let Some(last) = self.last_rtp_time {
            if self.sender && now.duration_since(last) > timeout {
                self.sender = false;
            }
        }
    }

    /// Clear a NOTE older than `timeout`. Returns whether one was cleared.
    pub(crate) fn expire_note(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.note_time {
            Some(at) if now.duration_since(at) > timeout => {
                self.sdes.note = None;
                self.note_time = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn check_address(&mut self, sender: SenderAddress, is_rtp: bool) -> bool {
        let (slot, other) = if is_rtp {
            (&mut self.rtp_addr, self.rtcp_addr)
        } else {
            (&mut self.rtcp_addr, self.rtp_addr)
        };
        match *slot {
            Some(existing) => existing != sender,
            None => {
                if let Some(other) = other {
                    if !other.same_host(&sender) {
                        return true;
                    }
                }
                *slot = Some(sender);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wrap_counts_cycle() {
        let mut stats = ReceptionStats::default();
        assert_eq!(stats.update_sequence(65534), Some(65534));
        assert_eq!(stats.update_sequence(65535), Some(65535));
        assert_eq!(stats.update_sequence(0), Some(65536));
        assert_eq!(stats.update_sequence(1), Some(65537));
    }

    #[test]
    fn large_jump_needs_two_packets() {
        let mut stats = ReceptionStats::default();
        stats.update_sequence(10);
        assert_eq!(stats.update_sequence(20_000), None);
        assert_eq!(stats.update_sequence(20_001), Some(20_001));
        assert_eq!(stats.base_seq, 20_001);
    }

    #[test]
    fn loss_fraction_in_report() {
        let mut stats = ReceptionStats::default();
        for seq in [0u16, 1, 2, 4, 5, 6, 8, 9] {
            stats.update_sequence(seq);
        }
        let mut block = ReportBlock::default();
        stats.fill_report(&mut block);
        assert_eq!(block.packets_lost, 2);
        assert_eq!(block.highest_sequence, 9);
        assert_eq!(block.fraction_lost, (2 * 256 / 10) as u8);

        stats.update_sequence(10);
        stats.fill_report(&mut block);
        assert_eq!(block.fraction_lost, 0);
    }

    #[test]
    fn jitter_stays_zero_for_regular_arrivals() {
        let mut stats = ReceptionStats::default();
        for i in 0..10u32 {
            stats.update_jitter(i as f64 * 160.0, i * 160);
        }
        assert!(stats.jitter.abs() < 1e-9);
    }

    #[test]
    fn own_source_collides_with_remote_sender() {
        let mut own = SourceData::new_own(7, Instant::now());
        let remote = SenderAddress::Remote("10.0.0.5:6000".parse().unwrap());
        assert!(own.check_address(remote, true));
        assert!(!own.check_address(SenderAddress::Own, true));
    }

    #[test]
    fn rtcp_address_must_share_host() {
        let mut src = SourceData::new(9, Instant::now());
        let rtp = SenderAddress::Remote("10.0.0.5:6000".parse().unwrap());
        assert!(!src.check_address(rtp, true));
        let other_host = SenderAddress::Remote("10.0.0.6:6001".parse().unwrap());
        assert!(src.check_address(other_host, false));
        let same_host = SenderAddress::Remote("10.0.0.5:6001".parse().unwrap());
        assert!(!src.check_address(same_host, false));
        assert_eq!(src.rtcp_address(), Some("10.0.0.5:6001".parse().unwrap()));
    }

    #[test]
    fn first_cname_sticks() {
        let mut src = SourceData::new(0xABCD, Instant::now());
        let now = Instant::now();
        assert!(src.set_sdes_item(SdesItemType::Cname, b"alice@a".to_vec(), now));
        assert!(src.set_sdes_item(SdesItemType::Cname, b"alice@a".to_vec(), now));
        assert!(!src.set_sdes_item(SdesItemType::Cname, b"mallory@b".to_vec(), now));
        assert_eq!(src.cname(), Some(&b"alice@a"[..]));

        assert!(src.set_sdes_item(SdesItemType::Name, b"Alice".to_vec(), now));
        assert!(src.set_sdes_item(SdesItemType::Name, b"Alicia".to_vec(), now));
        assert_eq!(src.sdes().name.as_deref(), Some(&b"Alicia"[..]));
    }

    #[test]
    fn note_expires_once() {
        let start = Instant::now();
        let mut src = SourceData::new(1, start);
        src.set_sdes_item(SdesItemType::Note, b"brb".to_vec(), start);
        let later = start + Duration::from_secs(10);
        assert!(src.expire_note(later, Duration::from_secs(5)));
        assert!(src.sdes().note.is_none());
        assert!(!src.expire_note(later, Duration::from_secs(5)));
    }
}
