//! Transmitter that never touches a socket.
//!
//! Outbound datagrams go to a caller-supplied callback; inbound datagrams
//! are handed in through [`FakeTransmissionParams::set_current_data`] and
//! picked up by the next [`poll`](Transmitter::poll). This lets a host
//! that runs its own I/O loop embed an RTP session.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::common::{TransmitterCore, discover_local_ips};
use super::{
    MAX_TRANSMITTER_PACKET_SIZE, ReceiveMode, TransmissionInfo, TransmissionParams,
    TransmissionProtocol, Transmitter, UDPV4_HEADER_OVERHEAD,
};
use crate::error::{Result, RtpError};
use crate::packet::RawPacket;

/// Called once per destination for every outbound datagram with
/// `(data, destination ip, destination port, is_rtp)`.
pub type PacketReadyCallback = Arc<dyn Fn(&[u8], IpAddr, u16, bool) + Send + Sync>;

#[derive(Debug)]
struct Inbound {
    data: Vec<u8>,
    sender: SocketAddr,
    is_rtp: bool,
}

#[derive(Clone)]
pub struct FakeTransmissionParams {
    pub portbase: u16,
    pub multicast_ttl: u8,
    /// Addresses reported as local. Discovered when empty.
    pub local_ips: Vec<IpAddr>,
    pub packet_ready: Option<PacketReadyCallback>,
    inbound: Arc<Mutex<Option<Inbound>>>,
}

impl FakeTransmissionParams {
    pub fn new(portbase: u16) -> Self {
        Self {
            portbase,
            multicast_ttl: 1,
            local_ips: Vec::new(),
            packet_ready: None,
            inbound: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_packet_ready(
        mut self,
        callback: impl Fn(&[u8], IpAddr, u16, bool) + Send + Sync + 'static,
    ) -> Self {
        self.packet_ready = Some(Arc::new(callback));
        self
    }

    /// Stage one inbound datagram. It is consumed by the next poll; a
    /// datagram staged before the previous one was polled replaces it.
    pub fn set_current_data(&self, data: &[u8], ip: IpAddr, port: u16, is_rtp: bool) {
        *self.inbound.lock() = Some(Inbound {
            data: data.to_vec(),
            sender: SocketAddr::new(ip, port),
            is_rtp,
        });
    }

    fn take_current_data(&self) -> Option<Inbound> {
        self.inbound.lock().take()
    }
}

impl Default for FakeTransmissionParams {
    fn default() -> Self {
        Self::new(5000)
    }
}

impl fmt::Debug for FakeTransmissionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTransmissionParams")
            .field("portbase", &self.portbase)
            .field("multicast_ttl", &self.multicast_ttl)
            .field("local_ips", &self.local_ips)
            .field("packet_ready", &self.packet_ready.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTransmissionInfo {
    pub local_ips: Vec<IpAddr>,
    pub portbase: u16,
}

struct Bound {
    core: TransmitterCore,
    params: FakeTransmissionParams,
}

impl Bound {
    fn send(&mut self, data: &[u8], is_rtp: bool) -> Result<()> {
        self.core.check_outgoing(data)?;
        if let Some(callback) = &self.params.packet_ready {
            for dest in self.core.destinations() {
                let port = if is_rtp {
                    dest.rtp_port()
                } else {
                    dest.rtcp_port()
                };
                callback(data, dest.ip(), port, is_rtp);
            }
        }
        self.core.count_sent(is_rtp);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransmitter {
    initialized: AtomicBool,
    bound: Mutex<Option<Bound>>,
}

impl FakeTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bound<T>(&self, f: impl FnOnce(&mut Bound) -> Result<T>) -> Result<T> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(RtpError::TransmitterNotInitialized);
        }
        let mut guard = self.bound.lock();
        let bound = guard.as_mut().ok_or(RtpError::TransmitterNotCreated)?;
        f(bound)
    }
}

impl Transmitter for FakeTransmitter {
    fn protocol(&self) -> TransmissionProtocol {
        TransmissionProtocol::Fake
    }

    fn init(&self, threadsafe: bool) -> Result<()> {
        if threadsafe {
            return Err(RtpError::ThreadsNotSupported);
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(RtpError::TransmitterAlreadyInitialized);
        }
        Ok(())
    }

    fn create(&self, max_packet_size: usize, params: &TransmissionParams) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(RtpError::TransmitterNotInitialized);
        }
        let TransmissionParams::Fake(params) = params else {
            return Err(RtpError::IllegalParameters(TransmissionProtocol::Fake));
        };
        let mut guard = self.bound.lock();
        if guard.is_some() {
            return Err(RtpError::TransmitterAlreadyCreated);
        }
        if max_packet_size > MAX_TRANSMITTER_PACKET_SIZE {
            return Err(RtpError::PacketSizeTooBig {
                size: max_packet_size,
                max: MAX_TRANSMITTER_PACKET_SIZE,
            });
        }
        if params.portbase % 2 != 0 {
            return Err(RtpError::PortbaseNotEven(params.portbase));
        }
        let local_ips = if params.local_ips.is_empty() {
            discover_local_ips(false)
        } else {
            params.local_ips.clone()
        };
        if local_ips.is_empty() {
            return Err(RtpError::NoLocalIps);
        }

        *guard = Some(Bound {
            core: TransmitterCore::new(max_packet_size, local_ips),
            params: params.clone(),
        });
        tracing::debug!(portbase = params.portbase, "fake transmitter created");
        Ok(())
    }

    fn destroy(&self) {
        if self.bound.lock().take().is_some() {
            tracing::debug!("fake transmitter destroyed");
        }
    }

    fn transmission_info(&self) -> Option<TransmissionInfo> {
        let guard = self.bound.lock();
        let bound = guard.as_ref()?;
        Some(TransmissionInfo::Fake(FakeTransmissionInfo {
            local_ips: bound.core.local_ips().to_vec(),
            portbase: bound.params.portbase,
        }))
    }

    fn local_host_name(&self, buffer: &mut [u8]) -> Result<usize> {
        self.with_bound(|b| b.core.local_host_name(buffer))
    }

    fn comes_from_this_transmitter(&self, addr: &SocketAddr) -> bool {
        let guard = self.bound.lock();
        let Some(bound) = guard.as_ref() else {
            return false;
        };
        let portbase = bound.params.portbase;
        (addr.port() == portbase || addr.port() == portbase.wrapping_add(1))
            && bound.core.local_ips().contains(&addr.ip())
    }

    fn header_overhead(&self) -> usize {
        UDPV4_HEADER_OVERHEAD
    }

    fn poll(&self) -> Result<()> {
        self.with_bound(|b| {
            if let Some(inbound) = b.params.take_current_data() {
                b.core.enqueue(inbound.data, inbound.sender, inbound.is_rtp);
            }
            Ok(())
        })
    }

    fn wait_for_incoming_data(&self, _timeout: Duration) -> Result<bool> {
        Err(RtpError::WaitNotSupported)
    }

    fn abort_wait(&self) -> Result<()> {
        Ok(())
    }

    fn send_rtp_data(&self, data: &[u8]) -> Result<()> {
        self.with_bound(|b| b.send(data, true))
    }

    fn send_rtcp_data(&self, data: &[u8]) -> Result<()> {
        self.with_bound(|b| b.send(data, false))
    }

    fn reset_packet_count(&self) {
        let _ = self.with_bound(|b| {
            b.core.reset_counts();
            Ok(())
        });
    }

    fn num_rtp_packets_sent(&self) -> u32 {
        self.with_bound(|b| Ok(b.core.rtp_sent())).unwrap_or(0)
    }

    fn num_rtcp_packets_sent(&self) -> u32 {
        self.with_bound(|b| Ok(b.core.rtcp_sent())).unwrap_or(0)
    }

    fn add_destination(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.add_destination(addr))
    }

    fn delete_destination(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.delete_destination(addr))
    }

    fn clear_destinations(&self) {
        let _ = self.with_bound(|b| {
            b.core.clear_destinations();
            Ok(())
        });
    }

    fn supports_multicasting(&self) -> bool {
        false
    }

    fn join_multicast_group(&self, _addr: IpAddr) -> Result<()> {
        Err(RtpError::NoMulticastSupport)
    }

    fn leave_multicast_group(&self, _addr: IpAddr) -> Result<()> {
        Err(RtpError::NoMulticastSupport)
    }

    fn leave_all_multicast_groups(&self) {}

    fn set_receive_mode(&self, mode: ReceiveMode) -> Result<()> {
        self.with_bound(|b| {
            b.core.set_receive_mode(mode);
            Ok(())
        })
    }

    fn add_to_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.filter_mut().add_to_ignore_list(addr))
    }

    fn delete_from_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.filter_mut().delete_from_ignore_list(addr))
    }

    fn clear_ignore_list(&self) {
        let _ = self.with_bound(|b| {
            b.core.filter_mut().clear_ignore_list();
            Ok(())
        });
    }

    fn add_to_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.filter_mut().add_to_accept_list(addr))
    }

    fn delete_from_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.with_bound(|b| b.core.filter_mut().delete_from_accept_list(addr))
    }

    fn clear_accept_list(&self) {
        let _ = self.with_bound(|b| {
            b.core.filter_mut().clear_accept_list();
            Ok(())
        });
    }

    fn set_maximum_packet_size(&self, size: usize) -> Result<()> {
        self.with_bound(|b| b.core.set_max_packet_size(size, MAX_TRANSMITTER_PACKET_SIZE))
    }

    fn new_data_available(&self) -> bool {
        self.with_bound(|b| Ok(b.core.has_packets())).unwrap_or(false)
    }

    fn get_next_packet(&self) -> Option<RawPacket> {
        self.with_bound(|b| Ok(b.core.next_packet())).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sent = Arc<Mutex<Vec<(Vec<u8>, IpAddr, u16, bool)>>>;

    fn created() -> (FakeTransmitter, FakeTransmissionParams, Sent) {
        let sent: Sent = Arc::default();
        let sink = Arc::clone(&sent);
        let mut params = FakeTransmissionParams::new(5000).with_packet_ready(
            move |data, ip, port, is_rtp| sink.lock().push((data.to_vec(), ip, port, is_rtp)),
        );
        params.local_ips = vec!["192.168.0.2".parse().unwrap()];
        let t = FakeTransmitter::new();
        t.init(false).unwrap();
        t.create(1500, &TransmissionParams::Fake(params.clone()))
            .unwrap();
        (t, params, sent)
    }

    #[test]
    fn threadsafe_init_refused() {
        let t = FakeTransmitter::new();
        assert!(matches!(t.init(true), Err(RtpError::ThreadsNotSupported)));
    }

    #[test]
    fn callback_per_destination() {
        let (t, _, sent) = created();
        t.add_destination("10.0.0.1:6000".parse().unwrap()).unwrap();
        t.add_destination("10.0.0.2:7000".parse().unwrap()).unwrap();
        t.send_rtcp_data(b"rtcp").unwrap();
        let sent = sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(d, _, _, rtp)| d == b"rtcp" && !rtp));
        let mut ports: Vec<u16> = sent.iter().map(|s| s.2).collect();
        ports.sort();
        assert_eq!(ports, vec![6001, 7001]);
        assert_eq!(t.num_rtcp_packets_sent(), 1);
    }

    #[test]
    fn staged_data_consumed_by_poll() {
        let (t, params, _) = created();
        params.set_current_data(b"abc", "10.0.0.9".parse().unwrap(), 4000, true);
        t.poll().unwrap();
        let packet = t.get_next_packet().unwrap();
        assert_eq!(packet.data(), b"abc");
        assert_eq!(packet.sender(), "10.0.0.9:4000".parse().unwrap());
        assert!(packet.is_rtp());
        t.poll().unwrap();
        assert!(!t.new_data_available());
    }

    #[test]
    fn own_ports_recognised() {
        let (t, _, _) = created();
        assert!(t.comes_from_this_transmitter(&"192.168.0.2:5001".parse().unwrap()));
        assert!(!t.comes_from_this_transmitter(&"192.168.0.2:5002".parse().unwrap()));
        assert!(!t.comes_from_this_transmitter(&"192.168.0.3:5000".parse().unwrap()));
    }

    #[test]
    fn unsupported_operations() {
        let (t, _, _) = created();
        assert!(matches!(
            t.wait_for_incoming_data(Duration::from_millis(1)),
            Err(RtpError::WaitNotSupported)
        ));
        assert!(t.abort_wait().is_ok());
        assert!(!t.supports_multicasting());
        assert!(matches!(
            t.join_multicast_group("224.0.0.1".parse().unwrap()),
            Err(RtpError::NoMulticastSupport)
        ));
    }

    #[test]
    fn info_reports_portbase() {
        let (t, _, _) = created();
        match t.transmission_info() {
            Some(TransmissionInfo::Fake(info)) => {
                assert_eq!(info.portbase, 5000);
                assert_eq!(info.local_ips, vec!["192.168.0.2".parse::<IpAddr>().unwrap()]);
            }
            other => panic!("unexpected info {other:?}"),
        }
        t.destroy();
        assert!(t.transmission_info().is_none());
    }
}
