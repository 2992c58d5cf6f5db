//! RTP session: the object applications talk to.
//!
//! An [`RtpSession`] ties a [`Transmitter`] to the local packet builder,
//! the RTCP builder and scheduler, and the table of participants.
//!
//! ## Lifecycle
//!
//! ```text
//! Uncreated ──create──► Created ──destroy────────────────► Uncreated
//!                          │
//!                          └──bye_destroy (BYE, bounded wait)──► Uncreated
//! ```
//!
//! A failed `create` leaves the session uncreated with every partially
//! acquired resource released.
//!
//! ## Processing
//!
//! Inbound data is handled by [`RtpSession::poll`] from the caller's
//! thread, or by a background poll thread when
//! [`SessionParams::use_poll_thread`] is set. Each pass feeds received
//! datagrams to the source table, resolves SSRC collisions (RFC 3550 §8.2),
//! expires silent participants and sends RTCP when it is due.

mod access;
mod params;
mod poll_thread;
mod shared;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

pub use access::SourceAccess;
pub use params::SessionParams;

use params::TimeoutMultipliers;
use poll_thread::PollThread;
use shared::{Builders, SessionCore, SourcesState};

use crate::error::{Result, RtpError};
use crate::handler::{NoopHandler, SessionHandler};
use crate::packet::rtcp::SdesItemType;
use crate::packet::{PacketBuilder, RTCP_SDES_MAX_ITEM_LENGTH, RTP_MIN_PACKET_SIZE};
use crate::rtcp::{RtcpBuilder, RtcpScheduler, RtcpSchedulerParams};
use crate::sources::{CollisionList, SourceTable};
use crate::transmitter::{
    FakeTransmitter, ReceiveMode, TransmissionInfo, TransmissionParams, Transmitter,
    UdpTransmitter,
};

/// Supplies the transmitter for [`TransmissionParams::UserDefined`].
pub type TransmitterFactory = Box<dyn FnMut() -> Option<Arc<dyn Transmitter>> + Send>;

struct Created {
    core: Arc<SessionCore>,
    poll_thread: Option<PollThread>,
}

impl Created {
    fn teardown(mut self) {
        if let Some(thread) = self.poll_thread.take() {
            thread.stop();
        }
        self.core.transmitter.destroy();
        {
            let mut state = self.core.sources.lock();
            if !state.bye_packets.is_empty() {
                tracing::debug!(count = state.bye_packets.len(), "dropping unsent BYE packets");
            }
            state.bye_packets.clear();
            state.collisions.clear();
            state.table.clear();
        }
        {
            let mut builders = self.core.builders.lock();
            builders.packets.destroy();
            builders.rtcp.destroy();
        }
        tracing::info!("RTP session destroyed");
    }
}

/// Calls `destroy` on a transmitter unless disarmed.
struct TransmitterGuard(Option<Arc<dyn Transmitter>>);

impl TransmitterGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for TransmitterGuard {
    fn drop(&mut self) {
        if let Some(transmitter) = self.0.take() {
            transmitter.destroy();
        }
    }
}

pub struct RtpSession {
    created: Option<Created>,
    factory: Option<TransmitterFactory>,
    handler: Arc<dyn SessionHandler>,
}

impl Default for RtpSession {
    fn default() -> Self {
        Self {
            created: None,
            factory: None,
            handler: Arc::new(NoopHandler),
        }
    }
}

impl RtpSession {
    /// Uncreated session using the built-in transmitters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that obtains its transmitter from `factory` when created
    /// with [`TransmissionParams::UserDefined`].
    pub fn with_transmitter_factory(
        factory: impl FnMut() -> Option<Arc<dyn Transmitter>> + Send + 'static,
    ) -> Self {
        Self {
            created: None,
            factory: Some(Box::new(factory)),
            handler: Arc::new(NoopHandler),
        }
    }

    /// Receive session events through `handler`. Only allowed while the
    /// session is not created; the handler stays installed across
    /// `destroy` and `create`.
    pub fn set_handler(&mut self, handler: Arc<dyn SessionHandler>) -> Result<()> {
        if self.created.is_some() {
            return Err(RtpError::AlreadyCreated);
        }
        self.handler = handler;
        Ok(())
    }

    /// Whether `create` succeeded and no teardown has happened since.
    pub fn is_created(&self) -> bool {
        self.created.is_some()
    }

    fn core(&self) -> Result<&SessionCore> {
        self.created
            .as_ref()
            .map(|c| c.core.as_ref())
            .ok_or(RtpError::NotCreated)
    }

    fn core_without_poll_thread(&self) -> Result<&SessionCore> {
        let created = self.created.as_ref().ok_or(RtpError::NotCreated)?;
        if created.poll_thread.is_some() {
            return Err(RtpError::UsingPollThread);
        }
        Ok(&created.core)
    }

    fn new_transmitter(&mut self, params: &TransmissionParams) -> Result<Arc<dyn Transmitter>> {
        let transmitter: Arc<dyn Transmitter> = match params {
            TransmissionParams::Udpv4(_) => Arc::new(UdpTransmitter::new_v4()),
            TransmissionParams::Udpv6(_) => Arc::new(UdpTransmitter::new_v6()),
            TransmissionParams::Fake(_) => Arc::new(FakeTransmitter::new()),
            TransmissionParams::UserDefined => {
                let factory = self
                    .factory
                    .as_mut()
                    .ok_or(RtpError::UserTransmitterMissing)?;
                factory().ok_or(RtpError::UserTransmitterMissing)?
            }
        };
        Ok(transmitter)
    }

    /// Bring the session up.
    ///
    /// Any failure releases whatever was set up before it, leaving the
    /// session uncreated.
    pub fn create(&mut self, params: &SessionParams, transmission: &TransmissionParams) -> Result<()> {
        if self.created.is_some() {
            return Err(RtpError::AlreadyCreated);
        }
        if params.max_packet_size < RTP_MIN_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooSmall {
                size: params.max_packet_size,
                min: RTP_MIN_PACKET_SIZE,
            });
        }

        let transmitter = self.new_transmitter(transmission)?;
        transmitter.init(params.use_poll_thread)?;
        let guard = TransmitterGuard(Some(transmitter.clone()));
        transmitter.create(params.max_packet_size, transmission)?;

        let mut packets = PacketBuilder::new();
        packets.init(params.max_packet_size)?;

        let mut table = SourceTable::new();
        table.set_handler(self.handler.clone());
        table.set_timestamp_unit(params.own_timestamp_unit);
        table.create_own_ssrc(packets.ssrc())?;

        transmitter.set_receive_mode(params.receive_mode)?;

        let cname = match &params.cname {
            Some(cname) => cname.as_bytes().to_vec(),
            None => build_cname(transmitter.as_ref())?,
        };
        let mut rtcp = RtcpBuilder::new();
        rtcp.init(params.max_packet_size, params.own_timestamp_unit, &cname)?;

        let mut scheduler = RtcpScheduler::new(transmitter.header_overhead());
        scheduler.set_parameters(&RtcpSchedulerParams {
            rtcp_bandwidth: params.session_bandwidth * params.control_traffic_fraction,
            sender_fraction: params.sender_control_fraction,
            min_interval: params.min_rtcp_interval,
            half_at_startup: params.use_half_rtcp_interval_at_startup,
            immediate_bye: params.request_immediate_bye,
        })?;

        let ssrc = packets.ssrc();
        let core = Arc::new(SessionCore {
            transmitter: transmitter.clone(),
            handler: self.handler.clone(),
            sources: parking_lot::Mutex::new(SourcesState {
                table,
                collisions: CollisionList::new(),
                bye_packets: Default::default(),
            }),
            scheduler: parking_lot::Mutex::new(scheduler),
            builders: parking_lot::Mutex::new(Builders { packets, rtcp }),
            accept_own_packets: params.accept_own_packets,
            sender_report_for_bye: params.sender_report_for_bye,
            control_traffic_fraction: params.control_traffic_fraction,
            multipliers: TimeoutMultipliers::from(params),
        });

        let poll_thread = if params.use_poll_thread {
            Some(PollThread::start(core.clone())?)
        } else {
            None
        };

        guard.disarm();
        self.created = Some(Created { core, poll_thread });
        tracing::info!(
            ssrc = format_args!("{:#010X}", ssrc),
            protocol = %transmitter.protocol(),
            cname = %String::from_utf8_lossy(&cname),
            "RTP session created"
        );
        Ok(())
    }

    /// Tear the session down without saying goodbye.
    pub fn destroy(&mut self) {
        if let Some(created) = self.created.take() {
            created.teardown();
        }
    }

    /// Send a BYE (if anything was sent under the current SSRC), waiting
    /// at most `max_wait` for the scheduler to allow it, then tear down.
    ///
    /// `reason` is truncated to 255 bytes.
    pub fn bye_destroy(&mut self, max_wait: Duration, reason: &[u8]) {
        let Some(mut created) = self.created.take() else {
            return;
        };
        if let Some(thread) = created.poll_thread.take() {
            thread.stop();
        }
        if let Err(e) = created.core.send_bye_and_wait(max_wait, reason) {
            tracing::warn!(error = %e, "sending BYE failed");
        }
        created.teardown();
    }

    /// SSRC currently used for outgoing packets.
    pub fn local_ssrc(&self) -> Result<u32> {
        Ok(self.core()?.builders.lock().packets.ssrc())
    }

    /// CNAME announced in outgoing SDES.
    pub fn current_cname(&self) -> Result<Vec<u8>> {
        Ok(self.core()?.builders.lock().rtcp.cname().to_vec())
    }

    /// Snapshot of the transmitter's addresses and sockets.
    pub fn transmission_info(&self) -> Result<TransmissionInfo> {
        self.core()?
            .transmitter
            .transmission_info()
            .ok_or(RtpError::TransmitterNotCreated)
    }

    /// Time until RTCP is next considered.
    pub fn rtcp_delay(&self) -> Result<Duration> {
        Ok(self.core()?.rtcp_delay())
    }

    /// RTP packets sent since the last SSRC change.
    pub fn num_rtp_packets_sent(&self) -> Result<u32> {
        Ok(self.core()?.transmitter.num_rtp_packets_sent())
    }

    /// RTCP packets sent since the last SSRC change.
    pub fn num_rtcp_packets_sent(&self) -> Result<u32> {
        Ok(self.core()?.transmitter.num_rtcp_packets_sent())
    }

    /// Change the maximum packet size of transmitter and builders together.
    /// On failure the previous size stays in effect everywhere.
    pub fn set_maximum_packet_size(&self, size: usize) -> Result<()> {
        let core = self.core()?;
        core.transmitter.set_maximum_packet_size(size)?;

        let mut builders = core.builders.lock();
        let previous = builders.packets.max_packet_size();
        let result = builders
            .packets
            .set_maximum_packet_size(size)
            .and_then(|()| builders.rtcp.set_maximum_packet_size(size));
        if let Err(e) = result {
            let _ = builders.packets.set_maximum_packet_size(previous);
            drop(builders);
            let _ = core.transmitter.set_maximum_packet_size(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Session bandwidth in bytes per second; the RTCP share follows it.
    pub fn set_session_bandwidth(&self, bandwidth: f64) -> Result<()> {
        let core = self.core()?;
        let mut scheduler = core.scheduler.lock();
        let mut params = scheduler.parameters().clone();
        params.rtcp_bandwidth = bandwidth * core.control_traffic_fraction;
        scheduler.set_parameters(&params)
    }

    /// Seconds per RTP timestamp tick, for sender reports and jitter.
    pub fn set_timestamp_unit(&self, unit: f64) -> Result<()> {
        let core = self.core()?;
        core.builders.lock().rtcp.set_timestamp_unit(unit)?;
        core.sources.lock().table.set_timestamp_unit(unit);
        Ok(())
    }

    /// Payload type used by [`send_packet`](Self::send_packet). Values above 127 are refused.
    pub fn set_default_payload_type(&self, pt: u8) -> Result<()> {
        self.core()?.builders.lock().packets.set_default_payload_type(pt)
    }

    /// Marker bit used by [`send_packet`](Self::send_packet).
    pub fn set_default_mark(&self, mark: bool) -> Result<()> {
        self.core()?.builders.lock().packets.set_default_mark(mark);
        Ok(())
    }

    /// Timestamp advance applied by [`send_packet`](Self::send_packet).
    pub fn set_default_timestamp_increment(&self, increment: u32) -> Result<()> {
        self.core()?
            .builders
            .lock()
            .packets
            .set_default_timestamp_increment(increment);
        Ok(())
    }

    fn send_built(&self, build: impl FnOnce(&mut PacketBuilder) -> Result<()>) -> Result<()> {
        let core = self.core()?;
        {
            let mut builders = core.builders.lock();
            build(&mut builders.packets)?;
            core.transmitter.send_rtp_data(builders.packets.packet())?;
            tracing::trace!(len = builders.packets.packet_len(), "RTP packet sent");
        }
        core.sources.lock().table.sent_rtp_packet();
        Ok(())
    }

    /// Send `payload` with the default payload type, marker and timestamp
    /// increment.
    pub fn send_packet(&self, payload: &[u8]) -> Result<()> {
        self.send_built(|p| p.build_packet_default(payload))
    }

    /// Send `payload` with explicit header fields.
    pub fn send_packet_with(
        &self,
        payload: &[u8],
        pt: u8,
        mark: bool,
        timestamp_increment: u32,
    ) -> Result<()> {
        self.send_built(|p| p.build_packet(payload, pt, mark, timestamp_increment))
    }

    /// Send `payload` with a header extension.
    pub fn send_packet_ex(
        &self,
        payload: &[u8],
        pt: u8,
        mark: bool,
        timestamp_increment: u32,
        extension_id: u16,
        extension_words: &[u32],
    ) -> Result<()> {
        self.send_built(|p| {
            p.build_packet_ex(
                payload,
                pt,
                mark,
                timestamp_increment,
                extension_id,
                extension_words,
            )
        })
    }

    /// Advance the RTP timestamp without sending, e.g. across silence.
    pub fn increment_timestamp(&self, increment: u32) -> Result<()> {
        self.core()?.builders.lock().packets.increment_timestamp(increment);
        Ok(())
    }

    /// Advance the RTP timestamp by the default increment.
    pub fn increment_timestamp_default(&self) -> Result<()> {
        self.core()?.builders.lock().packets.increment_timestamp_default()
    }

    /// Add a contributing source to outgoing packets (at most 15).
    pub fn add_to_csrc_list(&self, csrc: u32) -> Result<()> {
        self.core()?.builders.lock().packets.add_csrc(csrc)
    }

    /// Remove a contributing source from outgoing packets.
    pub fn delete_from_csrc_list(&self, csrc: u32) -> Result<()> {
        self.core()?.builders.lock().packets.delete_csrc(csrc)
    }

    /// Send packets without contributing sources.
    pub fn clear_csrc_list(&self) -> Result<()> {
        self.core()?.builders.lock().packets.clear_csrc_list();
        Ok(())
    }

    fn set_local_item(&self, kind: SdesItemType, value: &[u8]) -> Result<()> {
        self.core()?.builders.lock().rtcp.set_local_item(kind, value)
    }

    /// SDES items announced for the local participant. An empty value
    /// stops announcing the item.
    pub fn set_local_name(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Name, value)
    }

    pub fn set_local_email(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Email, value)
    }

    pub fn set_local_phone(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Phone, value)
    }

    pub fn set_local_location(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Loc, value)
    }

    pub fn set_local_tool(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Tool, value)
    }

    pub fn set_local_note(&self, value: &[u8]) -> Result<()> {
        self.set_local_item(SdesItemType::Note, value)
    }

    /// Send RTP to `addr` and RTCP to the port above it.
    pub fn add_destination(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.add_destination(addr)
    }

    /// Stop sending to `addr`.
    pub fn delete_destination(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.delete_destination(addr)
    }

    /// Stop sending to every destination.
    pub fn clear_destinations(&self) -> Result<()> {
        self.core()?.transmitter.clear_destinations();
        Ok(())
    }

    /// Whether the transmitter can join multicast groups.
    pub fn supports_multicasting(&self) -> Result<bool> {
        Ok(self.core()?.transmitter.supports_multicasting())
    }

    /// Join `addr` on both the RTP and RTCP sockets.
    pub fn join_multicast_group(&self, addr: IpAddr) -> Result<()> {
        self.core()?.transmitter.join_multicast_group(addr)
    }

    /// Leave a group joined with [`join_multicast_group`](Self::join_multicast_group).
    pub fn leave_multicast_group(&self, addr: IpAddr) -> Result<()> {
        self.core()?.transmitter.leave_multicast_group(addr)
    }

    /// Leave every joined group.
    pub fn leave_all_multicast_groups(&self) -> Result<()> {
        self.core()?.transmitter.leave_all_multicast_groups();
        Ok(())
    }

    /// Change the receive mode. Accept and ignore lists are emptied.
    pub fn set_receive_mode(&self, mode: ReceiveMode) -> Result<()> {
        self.core()?.transmitter.set_receive_mode(mode)
    }

    /// Drop datagrams from `addr` in [`ReceiveMode::IgnoreSome`]. Port 0
    /// matches every port of the host.
    pub fn add_to_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.add_to_ignore_list(addr)
    }

    /// Stop ignoring `addr`.
    pub fn delete_from_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.delete_from_ignore_list(addr)
    }

    /// Empty the ignore list.
    pub fn clear_ignore_list(&self) -> Result<()> {
        self.core()?.transmitter.clear_ignore_list();
        Ok(())
    }

    /// Accept datagrams from `addr` in [`ReceiveMode::AcceptSome`]. Port 0
    /// matches every port of the host.
    pub fn add_to_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.add_to_accept_list(addr)
    }

    /// Stop accepting `addr`.
    pub fn delete_from_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.core()?.transmitter.delete_from_accept_list(addr)
    }

    /// Empty the accept list.
    pub fn clear_accept_list(&self) -> Result<()> {
        self.core()?.transmitter.clear_accept_list();
        Ok(())
    }

    /// Read pending datagrams and run one processing pass.
    pub fn poll(&self) -> Result<()> {
        let core = self.core_without_poll_thread()?;
        core.transmitter.poll()?;
        core.process_polled_data()
    }

    /// Block until data arrives, `timeout` passes or [`abort_wait`](Self::abort_wait)
    /// is called. Returns whether data is available.
    pub fn wait_for_incoming_data(&self, timeout: Duration) -> Result<bool> {
        self.core_without_poll_thread()?
            .transmitter
            .wait_for_incoming_data(timeout)
    }

    /// Wake a thread blocked in [`wait_for_incoming_data`](Self::wait_for_incoming_data).
    pub fn abort_wait(&self) -> Result<()> {
        self.core_without_poll_thread()?.transmitter.abort_wait()
    }

    /// Lock the participant table for iteration until the returned guard
    /// is dropped.
    ///
    /// The guard borrows the session mutably, so no other session call can
    /// be made (and deadlock on the table lock) while it is alive:
    ///
    /// ```compile_fail
    /// # use rtpsession::RtpSession;
    /// let mut session = RtpSession::new();
    /// let access = session.begin_data_access().unwrap();
    /// session.send_packet(b"reply").unwrap();
    /// drop(access);
    /// ```
    ///
    /// Finish with the guard first, then act on what was found:
    ///
    /// ```no_run
    /// # use rtpsession::RtpSession;
    /// # fn reply(session: &mut RtpSession) -> rtpsession::Result<()> {
    /// let have_data = session.begin_data_access()?.goto_first_source_with_data();
    /// if have_data {
    ///     session.send_packet(b"reply")?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn begin_data_access(&mut self) -> Result<SourceAccess<'_>> {
        Ok(SourceAccess::new(self.core()?.sources.lock()))
    }
}

impl Drop for RtpSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// `login@host`, capped at the SDES item length.
fn build_cname(transmitter: &dyn Transmitter) -> Result<Vec<u8>> {
    let login = ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or(RtpError::CnameUnavailable)?;

    let mut host = vec![0u8; 256];
    let len = match transmitter.local_host_name(&mut host) {
        Ok(len) => len,
        Err(RtpError::BufferTooSmall { required }) => {
            host.resize(required, 0);
            transmitter.local_host_name(&mut host)?
        }
        Err(e) => return Err(e),
    };
    host.truncate(len);

    let mut cname = login.into_bytes();
    cname.push(b'@');
    cname.extend_from_slice(&host);
    cname.truncate(RTCP_SDES_MAX_ITEM_LENGTH);
    Ok(cname)
}
