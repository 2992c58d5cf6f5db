//! Per-SSRC participant bookkeeping.
//!
//! The [`SourceTable`] turns raw inbound datagrams into per-participant
//! state: RTP packet queues and reception statistics, RTCP sender info,
//! SDES items and BYE notices. It also tracks which address each SSRC
//! has been using so it can flag the moment a remote sender starts
//! using the local SSRC (RFC 3550 §8.2).

mod collision;
mod source_data;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use collision::CollisionList;
pub use source_data::{SdesInfo, SenderAddress, SourceData};

use crate::collections::KeyHashTable;
use crate::error::{Result, RtpError};
use crate::handler::{NoopHandler, SessionHandler};
use crate::packet::rtcp::{ReportBlock, RtcpCompoundPacket, RtcpPacket};
use crate::packet::{RawPacket, RtpPacket};
use crate::rtcp::RtcpScheduler;
use crate::transmitter::Transmitter;

/// Bucket count of the SSRC table.
pub const SOURCE_TABLE_BUCKETS: usize = 8317;

pub struct SourceTable {
    sources: KeyHashTable<u32, SourceData>,
    own_ssrc: Option<u32>,
    own_collision: bool,
    timestamp_unit: f64,
    epoch: Instant,
    handler: Arc<dyn SessionHandler>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self {
            sources: KeyHashTable::new(SOURCE_TABLE_BUCKETS),
            own_ssrc: None,
            own_collision: false,
            timestamp_unit: 1.0 / 8000.0,
            epoch: Instant::now(),
            handler: Arc::new(NoopHandler),
        }
    }

    /// Route participant events to `handler`.
    pub fn set_handler(&mut self, handler: Arc<dyn SessionHandler>) {
        self.handler = handler;
    }

    /// Seconds per RTP timestamp tick, used to express jitter in RTP units.
    pub fn set_timestamp_unit(&mut self, unit: f64) {
        if unit > 0.0 {
            self.timestamp_unit = unit;
        }
    }

    pub fn create_own_ssrc(&mut self, ssrc: u32) -> Result<()> {
        if self.own_ssrc.is_some() {
            return Err(RtpError::OwnSsrcExists);
        }
        if self.sources.has_element(&ssrc) {
            return Err(RtpError::SsrcExists(ssrc));
        }
        self.sources
            .add_element(ssrc, SourceData::new_own(ssrc, Instant::now()))?;
        self.own_ssrc = Some(ssrc);
        if let Some(src) = self.sources.get(&ssrc) {
            self.handler.on_new_source(src);
        }
        Ok(())
    }

    pub fn delete_own_ssrc(&mut self) -> Result<()> {
        let ssrc = self.own_ssrc.take().ok_or(RtpError::NoOwnSsrc)?;
        if let Some(src) = self.sources.get(&ssrc) {
            self.handler.on_remove_source(src);
        }
        self.sources.delete_element(&ssrc)?;
        Ok(())
    }

    pub fn own_ssrc(&self) -> Option<u32> {
        self.own_ssrc
    }

    pub fn own_source(&self) -> Option<&SourceData> {
        self.own_ssrc.and_then(|ssrc| self.sources.get(&ssrc))
    }

    /// Note that the local participant just sent an RTP packet.
    pub fn sent_rtp_packet(&mut self) {
        if let Some(src) = self.own_ssrc.and_then(|ssrc| self.sources.get_mut(&ssrc)) {
            src.sent_rtp_packet(Instant::now());
        }
    }

    pub fn clear_own_collision_flag(&mut self) {
        self.own_collision = false;
    }

    pub fn detected_own_collision(&self) -> bool {
        self.own_collision
    }

    /// Parse and account for one inbound datagram.
    ///
    /// Packets from this session's own transmitter are dropped unless
    /// `accept_own` is set. Malformed packets are discarded without error.
    pub fn process_raw_packet(
        &mut self,
        raw: RawPacket,
        transmitter: &dyn Transmitter,
        accept_own: bool,
        scheduler: &mut RtcpScheduler,
    ) -> Result<()> {
        let from_self = transmitter.comes_from_this_transmitter(&raw.sender());
        if from_self && !accept_own {
            return Ok(());
        }
        let sender = if from_self {
            SenderAddress::Own
        } else {
            SenderAddress::Remote(raw.sender())
        };
        let receive_time = raw.receive_time();

        if raw.is_rtp() {
            match RtpPacket::parse(raw.into_data(), receive_time) {
                Ok(packet) => self.process_rtp(packet, sender),
                Err(e) => tracing::trace!(error = %e, "dropping malformed RTP packet"),
            }
        } else {
            match RtcpCompoundPacket::parse(raw.into_data()) {
                Ok(compound) => {
                    scheduler.analyse_incoming(&compound);
                    self.process_rtcp(&compound, sender, receive_time);
                }
                Err(e) => tracing::trace!(error = %e, "dropping malformed RTCP packet"),
            }
        }
        Ok(())
    }

    fn process_rtp(&mut self, packet: RtpPacket, sender: SenderAddress) {
        let ssrc = packet.ssrc();
        let csrcs = packet.csrcs().to_vec();
        let now = packet.receive_time();
        let arrival_units =
            now.saturating_duration_since(self.epoch).as_secs_f64() / self.timestamp_unit;

        let handler = Arc::clone(&self.handler);
        let Some(src) = self.obtain(ssrc, sender, true, now) else {
            return;
        };
        handler.on_rtp_packet(&packet, &sender);
        if !src.process_rtp(packet, arrival_units, true) {
            tracing::trace!(ssrc, "RTP packet dropped by sequence validation");
            return;
        }

        for csrc in csrcs.into_iter().filter(|c| *c != ssrc) {
            match self.sources.get_mut(&csrc) {
                Some(src) => src.touch(now),
                None => {
                    let mut data = SourceData::new(csrc, now);
                    data.mark_csrc();
                    if self.sources.add_element(csrc, data).is_ok() {
                        if let Some(src) = self.sources.get(&csrc) {
                            handler.on_new_source(src);
                        }
                    }
                }
            }
        }
    }

    fn process_rtcp(&mut self, compound: &RtcpCompoundPacket, sender: SenderAddress, now: Instant) {
        let handler = Arc::clone(&self.handler);
        handler.on_rtcp_compound_packet(compound, &sender);
        let own = self.own_ssrc;
        let for_us = |reports: &[ReportBlock]| {
            reports
                .iter()
                .find(|r| Some(r.ssrc) == own)
                .cloned()
        };

        for packet in compound.packets() {
            match packet {
                RtcpPacket::SenderReport {
                    ssrc,
                    info,
                    reports,
                } => {
                    if let Some(src) = self.obtain(*ssrc, sender, false, now) {
                        src.set_sender_info(info.clone(), now);
                        if let Some(block) = for_us(reports) {
                            src.set_report_for_us(block, now);
                        }
                    }
                }
                RtcpPacket::ReceiverReport { ssrc, reports } => {
                    if let Some(src) = self.obtain(*ssrc, sender, false, now) {
                        src.mark_rtcp_seen(now);
                        if let Some(block) = for_us(reports) {
                            src.set_report_for_us(block, now);
                        }
                    }
                }
                RtcpPacket::SourceDescription(chunks) => {
                    for chunk in chunks {
                        if let Some(src) = self.obtain(chunk.ssrc, sender, false, now) {
                            src.mark_rtcp_seen(now);
                            for item in &chunk.items {
                                if !src.set_sdes_item(item.kind, item.value.clone(), now) {
                                    tracing::warn!(
                                        ssrc = format_args!("{:#010X}", chunk.ssrc),
                                        sender = ?sender,
                                        "CNAME collision"
                                    );
                                    handler.on_cname_collision(src, &sender, &item.value);
                                }
                            }
                        }
                    }
                }
                RtcpPacket::Goodbye { sources, reason } => {
                    for ssrc in sources.iter().filter(|s| Some(**s) != own) {
                        if let Some(src) = self.sources.get_mut(ssrc) {
                            tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "BYE received");
                            src.set_bye(reason.clone(), now);
                            handler.on_bye_packet(src);
                        }
                    }
                }
                RtcpPacket::App {
                    ssrc,
                    subtype,
                    name,
                    data,
                } => {
                    if let Some(src) = self.sources.get_mut(ssrc) {
                        src.touch(now);
                        handler.on_app_packet(src, *subtype, *name, data, &sender);
                    }
                }
                RtcpPacket::Unknown { .. } => {}
            }
        }
    }

    /// Look up or create `ssrc`, checking the sender address for a collision.
    /// Returns `None` when the packet collides and must be ignored.
    fn obtain(
        &mut self,
        ssrc: u32,
        sender: SenderAddress,
        is_rtp: bool,
        now: Instant,
    ) -> Option<&mut SourceData> {
        if !self.sources.has_element(&ssrc) {
            let mut data = SourceData::new(ssrc, now);
            if is_rtp {
                data.rtp_addr = Some(sender);
            } else {
                data.rtcp_addr = Some(sender);
            }
            self.sources.add_element(ssrc, data).ok()?;
            tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "new source");
            let src = self.sources.get_mut(&ssrc)?;
            self.handler.on_new_source(src);
            return Some(src);
        }

        let src = self.sources.get_mut(&ssrc)?;
        if src.check_address(sender, is_rtp) {
            if Some(ssrc) == self.own_ssrc {
                self.own_collision = true;
            }
            tracing::warn!(
                ssrc = format_args!("{:#010X}", ssrc),
                sender = ?sender,
                is_rtp,
                "SSRC collision"
            );
            self.handler.on_ssrc_collision(src, &sender, is_rtp);
            return None;
        }
        Some(src)
    }

    /// Expire participants and per-participant state.
    ///
    /// Sources that said BYE more than `bye_timeout` ago or were silent for
    /// `member_timeout` are removed. Senders quiet for `sender_timeout`
    /// lose the sender flag, and NOTE items older than `note_timeout` are
    /// cleared. The local source is never removed.
    pub fn multiple_timeouts(
        &mut self,
        now: Instant,
        sender_timeout: Duration,
        bye_timeout: Duration,
        member_timeout: Duration,
        note_timeout: Duration,
    ) {
        self.sources.goto_first_element();
        while let Some(src) = self.sources.current_element_mut() {
            if src.expire_note(now, note_timeout) {
                self.handler.on_note_timeout(src);
            }
            src.expire_sender(now, sender_timeout);
            let bye_expired = src.bye_timed_out(now, bye_timeout);
            let remove = !src.is_own() && (bye_expired || src.inactive_for(now) > member_timeout);
            if remove {
                let ssrc = src.ssrc();
                tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "source timed out");
                if bye_expired {
                    self.handler.on_bye_timeout(src);
                } else {
                    self.handler.on_timeout(src);
                }
                self.handler.on_remove_source(src);
                let _ = self.sources.delete_current_element();
            } else {
                self.sources.goto_next_element();
            }
        }
    }

    /// Report blocks for remote sources that sent data since the last report.
    pub(crate) fn report_blocks(&mut self, now: Instant, limit: usize) -> Vec<ReportBlock> {
        let candidates: Vec<u32> = self
            .sources
            .iter()
            .filter(|(_, src)| !src.is_own() && src.is_active() && src.is_sender())
            .map(|(ssrc, _)| *ssrc)
            .collect();
        candidates
            .into_iter()
            .filter_map(|ssrc| self.sources.get_mut(&ssrc)?.take_report_block(now))
            .take(limit)
            .collect()
    }

    pub fn total_count(&self) -> usize {
        self.sources.len()
    }

    pub fn active_member_count(&self) -> usize {
        self.sources.iter().filter(|(_, s)| s.is_active()).count()
    }

    pub fn sender_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|(_, s)| s.is_active() && s.is_sender())
            .count()
    }

    pub fn got_entry(&self, ssrc: u32) -> bool {
        self.sources.has_element(&ssrc)
    }

    pub fn source_info(&self, ssrc: u32) -> Option<&SourceData> {
        self.sources.get(&ssrc)
    }

    pub fn goto_first_source(&mut self) -> bool {
        self.sources.goto_first_element();
        self.sources.has_current_element()
    }

    pub fn goto_next_source(&mut self) -> bool {
        if !self.sources.has_current_element() {
            return false;
        }
        self.sources.goto_next_element();
        self.sources.has_current_element()
    }

    pub fn goto_previous_source(&mut self) -> bool {
        if !self.sources.has_current_element() {
            return false;
        }
        self.sources.goto_previous_element();
        self.sources.has_current_element()
    }

    pub fn goto_first_source_with_data(&mut self) -> bool {
        self.sources.goto_first_element();
        self.seek_data(true)
    }

    pub fn goto_next_source_with_data(&mut self) -> bool {
        if !self.sources.has_current_element() {
            return false;
        }
        self.sources.goto_next_element();
        self.seek_data(true)
    }

    pub fn goto_previous_source_with_data(&mut self) -> bool {
        if !self.sources.has_current_element() {
            return false;
        }
        self.sources.goto_previous_element();
        self.seek_data(false)
    }

    fn seek_data(&mut self, forward: bool) -> bool {
        while let Some(src) = self.sources.current_element() {
            if src.has_data() {
                return true;
            }
            if forward {
                self.sources.goto_next_element();
            } else {
                self.sources.goto_previous_element();
            }
        }
        false
    }

    pub fn current_source_info(&self) -> Option<&SourceData> {
        self.sources.current_element()
    }

    /// Dequeue the next RTP packet of the source under the cursor.
    pub fn get_next_packet(&mut self) -> Option<RtpPacket> {
        let src = self.sources.current_element_mut()?;
        if !src.is_validated() {
            return None;
        }
        src.next_packet()
    }

    /// Drop every queued RTP packet of every source.
    pub fn flush_packets(&mut self) {
        self.sources.goto_first_element();
        while let Some(src) = self.sources.current_element_mut() {
            src.flush_packets();
            self.sources.goto_next_element();
        }
    }

    pub fn clear(&mut self) {
        for (_, src) in self.sources.iter() {
            self.handler.on_remove_source(src);
        }
        self.sources.clear();
        self.own_ssrc = None;
        self.own_collision = false;
    }
}

impl Default for SourceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};

    use super::*;
    use crate::packet::rtcp::{SdesChunk, SdesItem, SdesItemType};
    use crate::transmitter::{FakeTransmissionParams, FakeTransmitter, TransmissionParams};

    const OWN: u32 = 0xAAAA_0001;

    fn transmitter() -> FakeTransmitter {
        let mut params = FakeTransmissionParams::new(5000);
        params.local_ips = vec!["192.168.0.2".parse().unwrap()];
        let t = FakeTransmitter::new();
        t.init(false).unwrap();
        t.create(1500, &TransmissionParams::Fake(params)).unwrap();
        t
    }

    fn remote(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::from([10, 0, 0, 5]), port)
    }

    fn rtp(ssrc: u32, seq: u16, csrcs: &[u32]) -> Vec<u8> {
        let mut data = vec![0x80 | csrcs.len() as u8, 96];
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&(seq as u32 * 160).to_be_bytes());
        data.extend_from_slice(&ssrc.to_be_bytes());
        for csrc in csrcs {
            data.extend_from_slice(&csrc.to_be_bytes());
        }
        data.extend_from_slice(b"media");
        data
    }

    struct Fixture {
        table: SourceTable,
        transmitter: FakeTransmitter,
        scheduler: RtcpScheduler,
    }

    impl Fixture {
        fn new() -> Self {
            let mut table = SourceTable::new();
            table.create_own_ssrc(OWN).unwrap();
            Self {
                table,
                transmitter: transmitter(),
                scheduler: RtcpScheduler::new(28),
            }
        }

        fn feed(&mut self, data: Vec<u8>, from: SocketAddr, is_rtp: bool) {
            self.table
                .process_raw_packet(
                    RawPacket::new(data, from, is_rtp),
                    &self.transmitter,
                    false,
                    &mut self.scheduler,
                )
                .unwrap();
        }
    }

    #[test]
    fn own_ssrc_lifecycle() {
        let mut table = SourceTable::new();
        table.create_own_ssrc(OWN).unwrap();
        assert!(matches!(table.create_own_ssrc(2), Err(RtpError::OwnSsrcExists)));
        assert!(table.own_source().unwrap().is_own());

        table.delete_own_ssrc().unwrap();
        assert_eq!(table.own_ssrc(), None);
        assert!(!table.got_entry(OWN));
        assert!(matches!(table.delete_own_ssrc(), Err(RtpError::NoOwnSsrc)));
    }

    #[test]
    fn remote_rtp_creates_sender_with_data() {
        let mut f = Fixture::new();
        f.feed(rtp(7, 100, &[9]), remote(6000), true);

        let src = f.table.source_info(7).unwrap();
        assert!(src.is_validated());
        assert!(src.is_sender());
        assert_eq!(src.rtp_address(), Some(remote(6000)));
        assert!(f.table.source_info(9).unwrap().is_csrc());
        assert_eq!(f.table.sender_count(), 1);

        assert!(f.table.goto_first_source_with_data());
        assert_eq!(f.table.current_source_info().unwrap().ssrc(), 7);
        assert_eq!(f.table.get_next_packet().unwrap().payload(), b"media");
        assert!(f.table.get_next_packet().is_none());
    }

    #[test]
    fn own_ssrc_from_remote_is_a_collision() {
        let mut f = Fixture::new();
        f.feed(rtp(OWN, 1, &[]), remote(6000), true);
        assert!(f.table.detected_own_collision());
        assert_eq!(f.table.total_count(), 1);

        f.table.clear_own_collision_flag();
        assert!(!f.table.detected_own_collision());
    }

    #[test]
    fn packets_from_own_transmitter_are_dropped() {
        let mut f = Fixture::new();
        let own_addr = SocketAddr::new("192.168.0.2".parse().unwrap(), 5000);
        f.feed(rtp(7, 1, &[]), own_addr, true);
        assert!(!f.table.got_entry(7));
    }

    #[test]
    fn malformed_packets_are_ignored() {
        let mut f = Fixture::new();
        f.feed(vec![0x40, 0, 0], remote(6000), true);
        f.feed(vec![0x80, 200, 0, 9], remote(6001), false);
        assert_eq!(f.table.total_count(), 1);
    }

    #[test]
    fn rtcp_bye_marks_and_then_expires_source() {
        let mut f = Fixture::new();
        f.feed(rtp(7, 1, &[]), remote(6000), true);

        let compound = RtcpCompoundPacket::build(
            vec![
                RtcpPacket::ReceiverReport {
                    ssrc: 7,
                    reports: Vec::new(),
                },
                RtcpPacket::SourceDescription(vec![SdesChunk {
                    ssrc: 7,
                    items: vec![SdesItem {
                        kind: SdesItemType::Cname,
                        value: b"peer@example.org".to_vec(),
                    }],
                }]),
                RtcpPacket::Goodbye {
                    sources: vec![7],
                    reason: b"bye".to_vec(),
                },
            ],
            1500,
        )
        .unwrap();
        f.feed(compound.data().to_vec(), remote(6001), false);

        let src = f.table.source_info(7).unwrap();
        assert!(src.received_bye());
        assert_eq!(src.bye_reason(), Some(&b"bye"[..]));
        assert_eq!(src.cname(), Some(&b"peer@example.org"[..]));
        assert_eq!(f.table.active_member_count(), 1);

        let later = Instant::now() + Duration::from_secs(2);
        let long = Duration::from_secs(100);
        f.table
            .multiple_timeouts(later, long, Duration::from_secs(1), long, long);
        assert!(!f.table.got_entry(7));
        assert!(f.table.got_entry(OWN));
    }

    #[test]
    fn silent_members_time_out_but_own_source_stays() {
        let mut f = Fixture::new();
        f.feed(rtp(7, 1, &[]), remote(6000), true);

        let later = Instant::now() + Duration::from_secs(30);
        let short = Duration::from_secs(10);
        f.table.multiple_timeouts(later, short, short, short, short);
        assert!(!f.table.got_entry(7));
        assert_eq!(f.table.own_ssrc(), Some(OWN));
    }

    #[test]
    fn iteration_visits_every_source() {
        let mut f = Fixture::new();
        f.feed(rtp(7, 1, &[]), remote(6000), true);
        f.feed(rtp(8, 1, &[]), remote(6002), true);

        let mut seen = Vec::new();
        let mut more = f.table.goto_first_source();
        while more {
            seen.push(f.table.current_source_info().unwrap().ssrc());
            more = f.table.goto_next_source();
        }
        assert_eq!(seen, vec![OWN, 7, 8]);
        assert!(!f.table.goto_next_source());
    }

    #[test]
    fn clear_forgets_own_ssrc() {
        let mut f = Fixture::new();
        f.feed(rtp(7, 1, &[]), remote(6000), true);
        f.table.clear();
        assert_eq!(f.table.total_count(), 0);
        assert_eq!(f.table.own_ssrc(), None);
        f.table.create_own_ssrc(OWN).unwrap();
    }

    #[derive(Default)]
    struct Recorder {
        events: parking_lot::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl SessionHandler for Recorder {
        fn on_new_source(&self, source: &SourceData) {
            self.push(format!("new {:#X}", source.ssrc()));
        }

        fn on_remove_source(&self, source: &SourceData) {
            self.push(format!("remove {:#X}", source.ssrc()));
        }

        fn on_rtp_packet(&self, packet: &RtpPacket, _sender: &SenderAddress) {
            self.push(format!("rtp {:#X}", packet.ssrc()));
        }

        fn on_app_packet(
            &self,
            source: &SourceData,
            subtype: u8,
            name: [u8; 4],
            _data: &[u8],
            _sender: &SenderAddress,
        ) {
            let name = String::from_utf8_lossy(&name).into_owned();
            self.push(format!("app {:#X} {subtype} {name}", source.ssrc()));
        }

        fn on_bye_packet(&self, source: &SourceData) {
            self.push(format!("bye {:#X}", source.ssrc()));
        }

        fn on_ssrc_collision(&self, source: &SourceData, _sender: &SenderAddress, is_rtp: bool) {
            self.push(format!("ssrc collision {:#X} {is_rtp}", source.ssrc()));
        }

        fn on_cname_collision(&self, source: &SourceData, _sender: &SenderAddress, cname: &[u8]) {
            let cname = String::from_utf8_lossy(cname).into_owned();
            self.push(format!("cname collision {:#X} {cname}", source.ssrc()));
        }

        fn on_timeout(&self, source: &SourceData) {
            self.push(format!("timeout {:#X}", source.ssrc()));
        }

        fn on_bye_timeout(&self, source: &SourceData) {
            self.push(format!("bye timeout {:#X}", source.ssrc()));
        }

        fn on_note_timeout(&self, source: &SourceData) {
            self.push(format!("note timeout {:#X}", source.ssrc()));
        }
    }

    fn recorded() -> (Fixture, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut f = Fixture::new();
        f.table.set_handler(recorder.clone());
        (f, recorder)
    }

    fn sdes(ssrc: u32, kind: SdesItemType, value: &[u8]) -> Vec<u8> {
        RtcpCompoundPacket::build(
            vec![
                RtcpPacket::ReceiverReport {
                    ssrc,
                    reports: Vec::new(),
                },
                RtcpPacket::SourceDescription(vec![SdesChunk {
                    ssrc,
                    items: vec![SdesItem {
                        kind,
                        value: value.to_vec(),
                    }],
                }]),
            ],
            1500,
        )
        .unwrap()
        .data()
        .to_vec()
    }

    #[test]
    fn second_cname_for_same_ssrc_is_refused() {
        let (mut f, recorder) = recorded();
        f.feed(sdes(0xABCD, SdesItemType::Cname, b"alice@a"), remote(6001), false);
        f.feed(sdes(0xABCD, SdesItemType::Cname, b"mallory@b"), remote(6001), false);
        f.feed(sdes(0xABCD, SdesItemType::Cname, b"alice@a"), remote(6001), false);

        let src = f.table.source_info(0xABCD).unwrap();
        assert_eq!(src.cname(), Some(&b"alice@a"[..]));
        assert_eq!(
            recorder.events(),
            vec!["new 0xABCD", "cname collision 0xABCD mallory@b"]
        );
    }

    #[test]
    fn handler_sees_packets_and_collisions() {
        let (mut f, recorder) = recorded();
        f.feed(rtp(7, 1, &[9]), remote(6000), true);
        f.feed(rtp(7, 2, &[]), SocketAddr::new(IpAddr::from([10, 0, 0, 6]), 6000), true);
        f.feed(rtp(OWN, 1, &[]), remote(6000), true);

        assert_eq!(
            recorder.events(),
            vec![
                "new 0x7",
                "rtp 0x7",
                "new 0x9",
                "ssrc collision 0x7 true",
                "ssrc collision 0xAAAA0001 true",
            ]
        );
        assert!(f.table.detected_own_collision());
    }

    #[test]
    fn handler_sees_every_kind_of_timeout() {
        let (mut f, recorder) = recorded();
        f.feed(rtp(7, 1, &[]), remote(6000), true);
        f.feed(rtp(8, 1, &[]), remote(6002), true);
        f.feed(sdes(8, SdesItemType::Note, b"brb"), remote(6003), false);
        let compound = RtcpCompoundPacket::build(
            vec![
                RtcpPacket::ReceiverReport {
                    ssrc: 7,
                    reports: Vec::new(),
                },
                RtcpPacket::Goodbye {
                    sources: vec![7],
                    reason: Vec::new(),
                },
            ],
            1500,
        )
        .unwrap();
        f.feed(compound.data().to_vec(), remote(6001), false);
        recorder.events.lock().clear();

        let later = Instant::now() + Duration::from_secs(30);
        let short = Duration::from_secs(10);
        f.table.multiple_timeouts(later, short, short, short, short);

        assert_eq!(
            recorder.events(),
            vec![
                "bye timeout 0x7",
                "remove 0x7",
                "note timeout 0x8",
                "timeout 0x8",
                "remove 0x8",
            ]
        );
        assert_eq!(f.table.total_count(), 1);
    }

    #[test]
    fn handler_sees_app_and_bye_in_order() {
        let (mut f, recorder) = recorded();
        f.feed(rtp(7, 1, &[]), remote(6000), true);
        let compound = RtcpCompoundPacket::build(
            vec![
                RtcpPacket::ReceiverReport {
                    ssrc: 7,
                    reports: Vec::new(),
                },
                RtcpPacket::App {
                    subtype: 3,
                    ssrc: 7,
                    name: *b"TEST",
                    data: vec![0; 4],
                },
                RtcpPacket::Goodbye {
                    sources: vec![7],
                    reason: Vec::new(),
                },
            ],
            1500,
        )
        .unwrap();
        f.feed(compound.data().to_vec(), remote(6001), false);

        assert_eq!(
            recorder.events(),
            vec!["new 0x7", "rtp 0x7", "app 0x7 3 TEST", "bye 0x7"]
        );
    }

    #[test]
    fn clear_reports_every_removed_source() {
        let (mut f, recorder) = recorded();
        f.feed(rtp(7, 1, &[]), remote(6000), true);
        recorder.events.lock().clear();
        f.table.clear();
        assert_eq!(recorder.events(), vec!["remove 0xAAAA0001", "remove 0x7"]);
    }
}
