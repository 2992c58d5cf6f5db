use std::net::{IpAddr, SocketAddr};

use crate::collections::HashIndex;

/// A remote RTP/RTCP port pair.
///
/// The RTCP port is always the RTP port plus one. Two destinations are
/// equal when address and RTP port match; the derived RTCP port takes no
/// part in equality or hashing.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Destination {
    ip: IpAddr,
    rtp_port: u16,
    rtcp_port: u16,
}

impl Destination {
    pub fn new(ip: IpAddr, rtp_port: u16) -> Self {
        Self {
            ip,
            rtp_port,
            rtcp_port: rtp_port.wrapping_add(1),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp_port
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtcp_port
    }

    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtp_port)
    }

    pub fn rtcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rtcp_port)
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.rtp_port == other.rtp_port
    }
}

impl HashIndex for Destination {
    fn bucket_index(&self, capacity: usize) -> usize {
        self.ip.bucket_index(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtcp_port_derived() {
        let d = Destination::new("10.1.2.3".parse().unwrap(), 5000);
        assert_eq!(d.rtcp_port(), 5001);
        assert_eq!(d.rtcp_addr(), "10.1.2.3:5001".parse().unwrap());
    }

    #[test]
    fn equality_ignores_rtcp_port() {
        let a = Destination::new("10.1.2.3".parse().unwrap(), 5000);
        let mut b = a;
        b.rtcp_port = 7000;
        assert_eq!(a, b);
        assert_eq!(a.bucket_index(8317), b.bucket_index(8317));
    }

    #[test]
    fn differs_by_address_or_port() {
        let a = Destination::new("10.1.2.3".parse().unwrap(), 5000);
        assert_ne!(a, Destination::new("10.1.2.3".parse().unwrap(), 5002));
        assert_ne!(a, Destination::new("10.1.2.4".parse().unwrap(), 5000));
    }

    #[test]
    fn ipv6_destination() {
        let d: Destination = "[::1]:6000".parse::<SocketAddr>().unwrap().into();
        assert_eq!(d.rtp_addr(), "[::1]:6000".parse().unwrap());
        assert!(d.bucket_index(13) < 13);
    }
}
