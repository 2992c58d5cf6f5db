//! UDP transmitter over IPv4 or IPv6.
//!
//! Two non-blocking sockets are bound: RTP on the port base and RTCP on
//! the port base plus one. Blocking waits go through a `mio::Poll` with a
//! [`mio::Waker`] registered next to the sockets, so
//! [`abort_wait`](Transmitter::abort_wait) can interrupt a waiting thread
//! from anywhere.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::common::{TransmitterCore, discover_local_ips};
use super::{
    MAX_TRANSMITTER_PACKET_SIZE, ReceiveMode, TRANSMITTER_HASH_SIZE, TransmissionInfo,
    TransmissionParams, TransmissionProtocol, Transmitter, UDPV4_HEADER_OVERHEAD,
    UDPV6_HEADER_OVERHEAD,
};
use crate::collections::HashTable;
use crate::error::{Result, RtpError};
use crate::packet::RawPacket;

const RTP_TOKEN: Token = Token(0);
const RTCP_TOKEN: Token = Token(1);
const WAKE_TOKEN: Token = Token(2);

/// Attempts at finding a free even/odd port pair when the port base is 0.
const EPHEMERAL_PAIR_ATTEMPTS: usize = 64;

const DEFAULT_BUFFER_SIZE: usize = 32768;

/// Socket configuration for [`UdpTransmitter`].
#[derive(Debug, Clone)]
pub struct UdpTransmissionParams {
    /// Local address to bind; the unspecified address when `None`.
    pub bind_ip: Option<IpAddr>,
    /// RTP port, must be even. RTCP uses `portbase + 1`. Zero picks a
    /// free pair.
    pub portbase: u16,
    pub multicast_ttl: u8,
    /// Addresses reported as local. Discovered when empty.
    pub local_ips: Vec<IpAddr>,
    pub rtp_send_buffer: usize,
    pub rtp_receive_buffer: usize,
    pub rtcp_send_buffer: usize,
    pub rtcp_receive_buffer: usize,
}

impl Default for UdpTransmissionParams {
    fn default() -> Self {
        Self {
            bind_ip: None,
            portbase: 5000,
            multicast_ttl: 1,
            local_ips: Vec::new(),
            rtp_send_buffer: DEFAULT_BUFFER_SIZE,
            rtp_receive_buffer: DEFAULT_BUFFER_SIZE,
            rtcp_send_buffer: DEFAULT_BUFFER_SIZE,
            rtcp_receive_buffer: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpTransmissionInfo {
    pub local_ips: Vec<IpAddr>,
    pub rtp_addr: SocketAddr,
    pub rtcp_addr: SocketAddr,
}

struct Bound {
    core: TransmitterCore,
    rtp: UdpSocket,
    rtcp: UdpSocket,
    rtp_addr: SocketAddr,
    rtcp_addr: SocketAddr,
    groups: HashTable<IpAddr>,
    recv_buf: Vec<u8>,
    poll: Arc<Mutex<Poll>>,
    waker: Arc<Waker>,
}

impl Bound {
    fn drain(&mut self) -> Result<()> {
        let Self {
            core,
            rtp,
            rtcp,
            recv_buf,
            ..
        } = self;
        drain_socket(rtp, recv_buf, core, true)?;
        drain_socket(rtcp, recv_buf, core, false)
    }

    fn send(&mut self, data: &[u8], is_rtp: bool) -> Result<()> {
        self.core.check_outgoing(data)?;
        let socket = if is_rtp { &self.rtp } else { &self.rtcp };
        for dest in self.core.destinations() {
            let addr = if is_rtp {
                dest.rtp_addr()
            } else {
                dest.rtcp_addr()
            };
            if let Err(e) = socket.send_to(data, addr) {
                tracing::warn!(%addr, error = %e, is_rtp, "send failed");
            }
        }
        self.core.count_sent(is_rtp);
        Ok(())
    }

    fn join(&self, group: IpAddr) -> io::Result<()> {
        for socket in [&self.rtp, &self.rtcp] {
            match group {
                IpAddr::V4(g) => socket.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)?,
                IpAddr::V6(g) => socket.join_multicast_v6(&g, 0)?,
            }
        }
        Ok(())
    }

    fn leave(&self, group: IpAddr) -> io::Result<()> {
        for socket in [&self.rtp, &self.rtcp] {
            match group {
                IpAddr::V4(g) => socket.leave_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)?,
                IpAddr::V6(g) => socket.leave_multicast_v6(&g, 0)?,
            }
        }
        Ok(())
    }

    fn leave_all(&mut self) {
        for group in self.groups.iter() {
            if let Err(e) = self.leave(*group) {
                tracing::warn!(%group, error = %e, "leaving multicast group failed");
            }
        }
        self.groups.clear();
    }
}

fn drain_socket(
    socket: &UdpSocket,
    buf: &mut [u8],
    core: &mut TransmitterCore,
    is_rtp: bool,
) -> Result<()> {
    loop {
        match socket.recv_from(buf) {
            Ok((len, sender)) => core.enqueue(buf[..len].to_vec(), sender, is_rtp),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                ) =>
            {
                tracing::trace!(error = %e, is_rtp, "ignoring ICMP error on receive");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Real-socket transmitter for one address family.
pub struct UdpTransmitter {
    ipv6: bool,
    initialized: AtomicBool,
    waiting: AtomicBool,
    bound: Mutex<Option<Bound>>,
}

impl UdpTransmitter {
    pub fn new_v4() -> Self {
        Self::with_family(false)
    }

    pub fn new_v6() -> Self {
        Self::with_family(true)
    }

    fn with_family(ipv6: bool) -> Self {
        Self {
            ipv6,
            initialized: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            bound: Mutex::new(None),
        }
    }

    fn check_family(&self, ip: IpAddr) -> Result<()> {
        if ip.is_ipv6() != self.ipv6 {
            return Err(RtpError::InvalidAddressType(ip));
        }
        Ok(())
    }

    fn with_bound<T>(&self, f: impl FnOnce(&mut Bound) -> Result<T>) -> Result<T> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(RtpError::TransmitterNotInitialized);
        }
        let mut guard = self.bound.lock();
        let bound = guard.as_mut().ok_or(RtpError::TransmitterNotCreated)?;
        f(bound)
    }

    fn open_socket(
        &self,
        addr: SocketAddr,
        send_buf: usize,
        recv_buf: usize,
        ttl: u8,
    ) -> Result<Socket> {
        let domain = if self.ipv6 { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if self.ipv6 {
            socket.set_only_v6(true)?;
            socket.set_multicast_hops_v6(u32::from(ttl))?;
        } else {
            socket.set_multicast_ttl_v4(u32::from(ttl))?;
        }
        socket.set_send_buffer_size(send_buf)?;
        socket.set_recv_buffer_size(recv_buf)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn open_pair(&self, params: &UdpTransmissionParams) -> Result<(Socket, Socket)> {
        let ip = match params.bind_ip {
            Some(ip) => {
                self.check_family(ip)?;
                ip
            }
            None if self.ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let open_rtp = |port| {
            self.open_socket(
                SocketAddr::new(ip, port),
                params.rtp_send_buffer,
                params.rtp_receive_buffer,
                params.multicast_ttl,
            )
        };
        let open_rtcp = |port| {
            self.open_socket(
                SocketAddr::new(ip, port),
                params.rtcp_send_buffer,
                params.rtcp_receive_buffer,
                params.multicast_ttl,
            )
        };

        if params.portbase != 0 {
            let rtp = open_rtp(params.portbase)?;
            let rtcp = open_rtcp(params.portbase.wrapping_add(1))?;
            return Ok((rtp, rtcp));
        }

        for _ in 0..EPHEMERAL_PAIR_ATTEMPTS {
            let rtp = open_rtp(0)?;
            let port = rtp
                .local_addr()?
                .as_socket()
                .map(|a| a.port())
                .unwrap_or(1);
            if port % 2 != 0 {
                continue;
            }
            if let Ok(rtcp) = open_rtcp(port + 1) {
                return Ok((rtp, rtcp));
            }
        }
        Err(io::Error::new(io::ErrorKind::AddrInUse, "no free RTP/RTCP port pair").into())
    }
}

impl Transmitter for UdpTransmitter {
    fn protocol(&self) -> TransmissionProtocol {
        if self.ipv6 {
            TransmissionProtocol::Ipv6Udp
        } else {
            TransmissionProtocol::Ipv4Udp
        }
    }

    fn init(&self, _threadsafe: bool) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(RtpError::TransmitterAlreadyInitialized);
        }
        Ok(())
    }

    fn create(&self, max_packet_size: usize, params: &TransmissionParams) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(RtpError::TransmitterNotInitialized);
        }
        let params = match (params, self.ipv6) {
            (TransmissionParams::Udpv4(p), false) | (TransmissionParams::Udpv6(p), true) => p,
            _ => return Err(RtpError::IllegalParameters(self.protocol())),
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
        for ip in &params.local_ips {
            self.check_family(*ip)?;
        }

        let local_ips = if params.local_ips.is_empty() {
            discover_local_ips(self.ipv6)
        } else {
            params.local_ips.clone()
        };
        if local_ips.is_empty() {
            return Err(RtpError::NoLocalIps);
        }

        let (rtp, rtcp) = self.open_pair(params)?;
        let mut rtp = UdpSocket::from_std(rtp.into());
        let mut rtcp = UdpSocket::from_std(rtcp.into());
        let rtp_addr = rtp.local_addr()?;
        let rtcp_addr = rtcp.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut rtp, RTP_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut rtcp, RTCP_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        *guard = Some(Bound {
            core: TransmitterCore::new(max_packet_size, local_ips),
            rtp,
            rtcp,
            rtp_addr,
            rtcp_addr,
            groups: HashTable::new(TRANSMITTER_HASH_SIZE),
            recv_buf: vec![0; MAX_TRANSMITTER_PACKET_SIZE],
            poll: Arc::new(Mutex::new(poll)),
            waker: Arc::new(waker),
        });
        tracing::debug!(rtp = %rtp_addr, rtcp = %rtcp_addr, "UDP transmitter created");
        Ok(())
    }

    fn destroy(&self) {
        let Some(mut bound) = self.bound.lock().take() else {
            return;
        };
        bound.leave_all();
        if self.waiting.load(Ordering::Acquire) {
            let _ = bound.waker.wake();
        }
        tracing::debug!(rtp = %bound.rtp_addr, "UDP transmitter destroyed");
    }

    fn transmission_info(&self) -> Option<TransmissionInfo> {
        let guard = self.bound.lock();
        let bound = guard.as_ref()?;
        let info = UdpTransmissionInfo {
            local_ips: bound.core.local_ips().to_vec(),
            rtp_addr: bound.rtp_addr,
            rtcp_addr: bound.rtcp_addr,
        };
        Some(if self.ipv6 {
            TransmissionInfo::Udpv6(info)
        } else {
            TransmissionInfo::Udpv4(info)
        })
    }

    fn local_host_name(&self, buffer: &mut [u8]) -> Result<usize> {
        self.with_bound(|b| b.core.local_host_name(buffer))
    }

    fn comes_from_this_transmitter(&self, addr: &SocketAddr) -> bool {
        let guard = self.bound.lock();
        let Some(bound) = guard.as_ref() else {
            return false;
        };
        let port = addr.port();
        if port != bound.rtp_addr.port() && port != bound.rtcp_addr.port() {
            return false;
        }
        let ip = addr.ip();
        bound.core.local_ips().contains(&ip) || ip == bound.rtp_addr.ip()
    }

    fn header_overhead(&self) -> usize {
        if self.ipv6 {
            UDPV6_HEADER_OVERHEAD
        } else {
            UDPV4_HEADER_OVERHEAD
        }
    }

    fn poll(&self) -> Result<()> {
        self.with_bound(|b| b.drain())
    }

    fn wait_for_incoming_data(&self, timeout: Duration) -> Result<bool> {
        // Drain first: readiness is edge-triggered, so data already sitting
        // in a socket would not produce a new event.
        let (poll, queued) = self.with_bound(|b| {
            b.drain()?;
            Ok((Arc::clone(&b.poll), b.core.has_packets()))
        })?;
        if queued {
            return Ok(true);
        }
        if self.waiting.swap(true, Ordering::AcqRel) {
            return Err(RtpError::AlreadyWaiting);
        }

        let mut events = Events::with_capacity(8);
        let outcome = poll.lock().poll(&mut events, Some(timeout));
        self.waiting.store(false, Ordering::Release);
        match outcome {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let data = events.iter().any(|ev| ev.token() != WAKE_TOKEN);
        if events.iter().any(|ev| ev.token() == WAKE_TOKEN) {
            tracing::trace!("wait aborted");
        }
        Ok(data)
    }

    /// Wake a thread blocked in `wait_for_incoming_data`.
    ///
    /// The wake-up is posted even when nobody is waiting, in which case the
    /// next wait returns immediately and `NotWaiting` is reported.
    fn abort_wait(&self) -> Result<()> {
        let waker = self.with_bound(|b| Ok(Arc::clone(&b.waker)))?;
        waker.wake()?;
        if !self.waiting.load(Ordering::Acquire) {
            return Err(RtpError::NotWaiting);
        }
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
        self.check_family(addr.ip())?;
        self.with_bound(|b| b.core.add_destination(addr))
    }

    fn delete_destination(&self, addr: SocketAddr) -> Result<()> {
        self.check_family(addr.ip())?;
        self.with_bound(|b| b.core.delete_destination(addr))
    }

    fn clear_destinations(&self) {
        let _ = self.with_bound(|b| {
            b.core.clear_destinations();
            Ok(())
        });
    }

    fn supports_multicasting(&self) -> bool {
        true
    }

    fn join_multicast_group(&self, addr: IpAddr) -> Result<()> {
        self.check_family(addr)?;
        if !addr.is_multicast() {
            return Err(RtpError::NotMulticastAddress(addr));
        }
        self.with_bound(|b| {
            if b.groups.has_element(&addr) {
                return Err(crate::error::CollectionErrorKind::ElementAlreadyExists.into());
            }
            b.join(addr)?;
            b.groups.add_element(addr)?;
            tracing::debug!(group = %addr, "joined multicast group");
            Ok(())
        })
    }

    fn leave_multicast_group(&self, addr: IpAddr) -> Result<()> {
        self.check_family(addr)?;
        self.with_bound(|b| {
            b.groups.delete_element(&addr)?;
            b.leave(addr)?;
            tracing::debug!(group = %addr, "left multicast group");
            Ok(())
        })
    }

    fn leave_all_multicast_groups(&self) {
        let _ = self.with_bound(|b| {
            b.leave_all();
            Ok(())
        });
    }

    fn set_receive_mode(&self, mode: ReceiveMode) -> Result<()> {
        self.with_bound(|b| {
            b.core.set_receive_mode(mode);
            Ok(())
        })
    }

    fn add_to_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.check_family(addr.ip())?;
        self.with_bound(|b| b.core.filter_mut().add_to_ignore_list(addr))
    }

    fn delete_from_ignore_list(&self, addr: SocketAddr) -> Result<()> {
        self.check_family(addr.ip())?;
        self.with_bound(|b| b.core.filter_mut().delete_from_ignore_list(addr))
    }

    fn clear_ignore_list(&self) {
        let _ = self.with_bound(|b| {
            b.core.filter_mut().clear_ignore_list();
            Ok(())
        });
    }

    fn add_to_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.check_family(addr.ip())?;
        self.with_bound(|b| b.core.filter_mut().add_to_accept_list(addr))
    }

    fn delete_from_accept_list(&self, addr: SocketAddr) -> Result<()> {
        self.check_family(addr.ip())?;
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

impl Drop for UdpTransmitter {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback_params() -> TransmissionParams {
        TransmissionParams::Udpv4(UdpTransmissionParams {
            bind_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            portbase: 0,
            local_ips: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            ..Default::default()
        })
    }

    fn created() -> UdpTransmitter {
        let t = UdpTransmitter::new_v4();
        t.init(false).unwrap();
        t.create(1400, &loopback_params()).unwrap();
        t
    }

    fn info(t: &UdpTransmitter) -> UdpTransmissionInfo {
        match t.transmission_info() {
            Some(TransmissionInfo::Udpv4(info)) => info,
            other => panic!("unexpected info {other:?}"),
        }
    }

    fn wait_for_packet(t: &UdpTransmitter) -> RawPacket {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            t.wait_for_incoming_data(Duration::from_millis(100)).unwrap();
            t.poll().unwrap();
            if let Some(packet) = t.get_next_packet() {
                return packet;
            }
        }
        panic!("no packet received");
    }

    #[test]
    fn create_requires_init() {
        let t = UdpTransmitter::new_v4();
        assert!(matches!(
            t.create(1400, &loopback_params()),
            Err(RtpError::TransmitterNotInitialized)
        ));
        t.init(false).unwrap();
        assert!(t.init(false).is_err());
    }

    #[test]
    fn rejects_wrong_params() {
        let t = UdpTransmitter::new_v6();
        t.init(false).unwrap();
        assert!(matches!(
            t.create(1400, &loopback_params()),
            Err(RtpError::IllegalParameters(TransmissionProtocol::Ipv6Udp))
        ));
    }

    #[test]
    fn rejects_odd_portbase() {
        let t = UdpTransmitter::new_v4();
        t.init(false).unwrap();
        let params = TransmissionParams::Udpv4(UdpTransmissionParams {
            portbase: 5001,
            ..Default::default()
        });
        assert!(matches!(
            t.create(1400, &params),
            Err(RtpError::PortbaseNotEven(5001))
        ));
        assert!(t.transmission_info().is_none());
    }

    #[test]
    fn ephemeral_pair_is_adjacent() {
        let t = created();
        let info = info(&t);
        assert_eq!(info.rtp_addr.port() % 2, 0);
        assert_eq!(info.rtcp_addr.port(), info.rtp_addr.port() + 1);
        assert!(t.comes_from_this_transmitter(&info.rtcp_addr));
        assert!(!t.comes_from_this_transmitter(&"127.0.0.1:9".parse().unwrap()));
    }

    #[test]
    fn loopback_send_and_receive() {
        let a = created();
        let b = created();
        let b_info = info(&b);
        a.add_destination(b_info.rtp_addr).unwrap();
        a.send_rtp_data(b"hello").unwrap();
        a.send_rtcp_data(b"world").unwrap();
        assert_eq!(a.num_rtp_packets_sent(), 1);
        assert_eq!(a.num_rtcp_packets_sent(), 1);

        let first = wait_for_packet(&b);
        let second = match b.get_next_packet() {
            Some(p) => p,
            None => wait_for_packet(&b),
        };
        let mut got: Vec<(bool, Vec<u8>)> = vec![
            (first.is_rtp(), first.data().to_vec()),
            (second.is_rtp(), second.data().to_vec()),
        ];
        got.sort();
        assert_eq!(got, vec![(false, b"world".to_vec()), (true, b"hello".to_vec())]);
        assert_eq!(first.sender().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        a.reset_packet_count();
        assert_eq!(a.num_rtp_packets_sent(), 0);
    }

    #[test]
    fn ignore_list_filters_inbound() {
        let a = created();
        let b = created();
        b.set_receive_mode(ReceiveMode::IgnoreSome).unwrap();
        b.add_to_ignore_list(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .unwrap();
        a.add_destination(info(&b).rtp_addr).unwrap();
        a.send_rtp_data(b"dropped").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        b.poll().unwrap();
        assert!(!b.new_data_available());
    }

    #[test]
    fn abort_interrupts_wait() {
        let t = Arc::new(created());
        let waiter = {
            let t = Arc::clone(&t);
            std::thread::spawn(move || t.wait_for_incoming_data(Duration::from_secs(10)))
        };
        let start = Instant::now();
        while !t.waiting.load(Ordering::Acquire) {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
        t.abort_wait().unwrap();
        assert!(!waiter.join().unwrap().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn abort_without_waiter() {
        let t = created();
        assert!(matches!(t.abort_wait(), Err(RtpError::NotWaiting)));
    }

    #[test]
    fn oversized_send_rejected() {
        let t = created();
        t.set_maximum_packet_size(600).unwrap();
        assert!(matches!(
            t.send_rtp_data(&[0; 601]),
            Err(RtpError::PacketTooLarge { .. })
        ));
        assert_eq!(t.num_rtp_packets_sent(), 0);
        assert!(t.set_maximum_packet_size(70000).is_err());
    }

    #[test]
    fn wrong_family_destination() {
        let t = created();
        assert!(matches!(
            t.add_destination("[::1]:5000".parse().unwrap()),
            Err(RtpError::InvalidAddressType(_))
        ));
    }

    #[test]
    fn multicast_requires_group_address() {
        let t = created();
        assert!(t.supports_multicasting());
        assert!(matches!(
            t.join_multicast_group(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            Err(RtpError::NotMulticastAddress(_))
        ));
    }

    #[test]
    fn destroy_releases_sockets() {
        let t = created();
        t.destroy();
        assert!(t.transmission_info().is_none());
        assert!(matches!(
            t.send_rtp_data(b"x"),
            Err(RtpError::TransmitterNotCreated)
        ));
    }
}
