//! State and helpers shared by the bundled transmitters.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use hickory_resolver::Resolver;

use super::{Destination, ReceiveFilter, ReceiveMode, TRANSMITTER_HASH_SIZE};
use crate::collections::HashTable;
use crate::error::{Result, RtpError};
use crate::packet::RawPacket;

/// Destination set, receive filter, inbound queue and send counters.
pub(crate) struct TransmitterCore {
    destinations: HashTable<Destination>,
    filter: ReceiveFilter,
    queue: VecDeque<RawPacket>,
    rtp_sent: u32,
    rtcp_sent: u32,
    max_packet_size: usize,
    local_ips: Vec<IpAddr>,
    host_name: Option<Vec<u8>>,
}

impl TransmitterCore {
    pub(crate) fn new(max_packet_size: usize, local_ips: Vec<IpAddr>) -> Self {
        Self {
            destinations: HashTable::new(TRANSMITTER_HASH_SIZE),
            filter: ReceiveFilter::new(),
            queue: VecDeque::new(),
            rtp_sent: 0,
            rtcp_sent: 0,
            max_packet_size,
            local_ips,
            host_name: None,
        }
    }

    pub(crate) fn local_ips(&self) -> &[IpAddr] {
        &self.local_ips
    }

    pub(crate) fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub(crate) fn set_max_packet_size(&mut self, size: usize, limit: usize) -> Result<()> {
        if size > limit {
            return Err(RtpError::PacketSizeTooBig { size, max: limit });
        }
        self.max_packet_size = size;
        Ok(())
    }

    pub(crate) fn check_outgoing(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_packet_size {
            return Err(RtpError::PacketTooLarge {
                len: data.len(),
                max: self.max_packet_size,
            });
        }
        Ok(())
    }

    pub(crate) fn add_destination(&mut self, addr: SocketAddr) -> Result<()> {
        self.destinations.add_element(Destination::from(addr))?;
        tracing::debug!(%addr, "destination added");
        Ok(())
    }

    pub(crate) fn delete_destination(&mut self, addr: SocketAddr) -> Result<()> {
        self.destinations.delete_element(&Destination::from(addr))?;
        tracing::debug!(%addr, "destination removed");
        Ok(())
    }

    pub(crate) fn clear_destinations(&mut self) {
        self.destinations.clear();
    }

    pub(crate) fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter()
    }

    pub(crate) fn count_sent(&mut self, is_rtp: bool) {
        if is_rtp {
            self.rtp_sent = self.rtp_sent.wrapping_add(1);
        } else {
            self.rtcp_sent = self.rtcp_sent.wrapping_add(1);
        }
    }

    pub(crate) fn reset_counts(&mut self) {
        self.rtp_sent = 0;
        self.rtcp_sent = 0;
    }

    pub(crate) fn rtp_sent(&self) -> u32 {
        self.rtp_sent
    }

    pub(crate) fn rtcp_sent(&self) -> u32 {
        self.rtcp_sent
    }

    pub(crate) fn filter_mut(&mut self) -> &mut ReceiveFilter {
        &mut self.filter
    }

    pub(crate) fn set_receive_mode(&mut self, mode: ReceiveMode) {
        self.filter.set_mode(mode);
    }

    /// Queue a received datagram if the receive filter lets it through.
    pub(crate) fn enqueue(&mut self, data: Vec<u8>, sender: SocketAddr, is_rtp: bool) {
        if !self.filter.should_accept(&sender) {
            tracing::trace!(%sender, len = data.len(), "datagram rejected by receive filter");
            return;
        }
        tracing::trace!(%sender, len = data.len(), is_rtp, "datagram queued");
        self.queue.push_back(RawPacket::new(data, sender, is_rtp));
    }

    pub(crate) fn has_packets(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn next_packet(&mut self) -> Option<RawPacket> {
        self.queue.pop_front()
    }

    /// Copy the cached host name into `buffer`.
    pub(crate) fn local_host_name(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let local_ips = &self.local_ips;
        let name = self
            .host_name
            .get_or_insert_with(|| resolve_host_name(local_ips));
        if name.is_empty() {
            return Err(RtpError::NoLocalIps);
        }
        if buffer.len() < name.len() {
            return Err(RtpError::BufferTooSmall {
                required: name.len(),
            });
        }
        buffer[..name.len()].copy_from_slice(name);
        Ok(name.len())
    }
}

/// Per-address budget for the reverse lookups behind the CNAME host part.
const REVERSE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Host name used for the CNAME.
fn resolve_host_name(local_ips: &[IpAddr]) -> Vec<u8> {
    let system = hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned());
    let resolver = reverse_resolver();
    pick_host_name(local_ips, system, |ip| {
        resolver
            .as_ref()
            .map(|resolver| reverse_names(resolver, ip))
            .unwrap_or_default()
    })
}

/// Pick the first fully qualified name, trying in order the reverse DNS
/// names of the non-loopback local addresses, then the system host name.
/// Falls back to the first local address in textual form.
fn pick_host_name(
    local_ips: &[IpAddr],
    system: Option<String>,
    mut reverse: impl FnMut(IpAddr) -> Vec<String>,
) -> Vec<u8> {
    let qualified = |name: &String| name.contains('.');
    local_ips
        .iter()
        .filter(|ip| !ip.is_loopback())
        .find_map(|ip| reverse(*ip).into_iter().find(qualified))
        .or_else(|| system.filter(qualified))
        .map(String::into_bytes)
        .or_else(|| local_ips.first().map(|ip| ip.to_string().into_bytes()))
        .unwrap_or_default()
}

fn reverse_resolver() -> Option<Resolver> {
    let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
        Ok(conf) => conf,
        Err(e) => {
            tracing::debug!(error = %e, "no system resolver configuration");
            return None;
        }
    };
    opts.timeout = REVERSE_LOOKUP_TIMEOUT;
    opts.attempts = 1;
    match Resolver::new(config, opts) {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            tracing::debug!(error = %e, "resolver unavailable");
            None
        }
    }
}

fn reverse_names(resolver: &Resolver, ip: IpAddr) -> Vec<String> {
    match resolver.reverse_lookup(ip) {
        Ok(lookup) => lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_owned())
            .collect(),
        Err(e) => {
            tracing::debug!(%ip, error = %e, "reverse lookup failed");
            Vec::new()
        }
    }
}

/// Enumerate the local addresses of one family.
///
/// Interface addresses come first, then whatever the host name resolves
/// to. Loopback is always included.
pub(crate) fn discover_local_ips(ipv6: bool) -> Vec<IpAddr> {
    let wanted = |ip: &IpAddr| ip.is_ipv6() == ipv6;
    let mut ips: Vec<IpAddr> = Vec::new();
    let mut push = |ip: IpAddr| {
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    };

    match local_ip_address::list_afinet_netifas() {
        Ok(ifaces) => {
            for (_, ip) in ifaces.into_iter().filter(|(_, ip)| wanted(ip)) {
                push(ip);
            }
        }
        Err(e) => tracing::debug!(error = %e, "interface enumeration failed"),
    }

    if let Ok(name) = hostname::get() {
        let name = name.to_string_lossy().into_owned();
        match (name.as_str(), 0).to_socket_addrs() {
            Ok(addrs) => {
                for addr in addrs.filter(|a| wanted(&a.ip())) {
                    push(addr.ip());
                }
            }
            Err(e) => tracing::debug!(host = %name, error = %e, "host name lookup failed"),
        }
    }

    if ipv6 {
        push(IpAddr::V6(Ipv6Addr::LOCALHOST));
    } else {
        push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> TransmitterCore {
        TransmitterCore::new(1400, vec!["192.168.1.10".parse().unwrap()])
    }

    #[test]
    fn destinations_unique() {
        let mut core = core();
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        core.add_destination(addr).unwrap();
        assert!(core.add_destination(addr).is_err());
        core.delete_destination(addr).unwrap();
        assert!(core.delete_destination(addr).is_err());
    }

    #[test]
    fn queue_is_fifo_and_filtered() {
        let mut core = core();
        let a: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:5000".parse().unwrap();
        core.enqueue(vec![1], a, true);
        core.enqueue(vec![2], b, false);
        assert_eq!(core.next_packet().unwrap().data(), &[1]);
        assert_eq!(core.next_packet().unwrap().data(), &[2]);
        assert!(!core.has_packets());

        core.set_receive_mode(ReceiveMode::IgnoreSome);
        core.filter_mut().add_to_ignore_list(a).unwrap();
        core.enqueue(vec![3], a, true);
        assert!(!core.has_packets());
    }

    #[test]
    fn host_name_buffer_too_small() {
        let mut core = core();
        core.host_name = Some(b"media.example.org".to_vec());
        let mut empty = [0u8; 0];
        let required = match core.local_host_name(&mut empty) {
            Err(RtpError::BufferTooSmall { required }) => required,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(required, 17);
        let mut buf = vec![0u8; required];
        assert_eq!(core.local_host_name(&mut buf).unwrap(), required);
        assert_eq!(buf, b"media.example.org");
    }

    #[test]
    fn host_name_prefers_reverse_dns() {
        let ips: Vec<IpAddr> = vec![
            "127.0.0.1".parse().unwrap(),
            "192.168.1.10".parse().unwrap(),
            "10.1.2.3".parse().unwrap(),
        ];
        let mut asked = Vec::new();
        let name = pick_host_name(&ips, Some("box.local.lan".into()), |ip| {
            asked.push(ip);
            if ip == ips[2] {
                vec!["short".into(), "media-10.example.org".into()]
            } else {
                Vec::new()
            }
        });
        assert_eq!(name, b"media-10.example.org");
        assert_eq!(asked, vec![ips[1], ips[2]]);
    }

    #[test]
    fn host_name_falls_back_to_system_then_address() {
        let ips: Vec<IpAddr> = vec!["192.168.1.10".parse().unwrap()];
        let no_dns = |_: IpAddr| Vec::new();
        assert_eq!(
            pick_host_name(&ips, Some("box.example.org".into()), no_dns),
            b"box.example.org"
        );
        assert_eq!(pick_host_name(&ips, Some("box".into()), no_dns), b"192.168.1.10");
        assert_eq!(pick_host_name(&ips, None, no_dns), b"192.168.1.10");
        assert!(pick_host_name(&[], None, no_dns).is_empty());
    }

    #[test]
    fn outgoing_size_checked() {
        let mut core = core();
        core.set_max_packet_size(4, 65535).unwrap();
        assert!(core.check_outgoing(&[0; 4]).is_ok());
        assert!(matches!(
            core.check_outgoing(&[0; 5]),
            Err(RtpError::PacketTooLarge { len: 5, max: 4 })
        ));
        assert!(core.set_max_packet_size(70000, 65535).is_err());
        assert_eq!(core.max_packet_size(), 4);
    }

    #[test]
    fn discovery_includes_loopback() {
        assert!(discover_local_ips(false).contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
