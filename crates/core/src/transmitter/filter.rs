use std::net::{IpAddr, SocketAddr};

use super::{ReceiveMode, TRANSMITTER_HASH_SIZE};
use crate::collections::KeyHashTable;
use crate::error::{Result, RtpError};

/// Accept/ignore record for one source address.
///
/// With `all` unset, `ports` lists the ports that match. With `all`
/// set, every port matches except the ones in `ports`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub all: bool,
    pub ports: Vec<u16>,
}

impl PortInfo {
    fn matches(&self, port: u16) -> bool {
        self.all != self.ports.contains(&port)
    }
}

/// Receive-mode policy plus its accept/ignore table.
pub struct ReceiveFilter {
    mode: ReceiveMode,
    entries: KeyHashTable<IpAddr, PortInfo>,
}

impl ReceiveFilter {
    pub fn new() -> Self {
        Self {
            mode: ReceiveMode::AcceptAll,
            entries: KeyHashTable::new(TRANSMITTER_HASH_SIZE),
        }
    }

    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Switch mode. Entries are discarded even when the mode is unchanged.
    pub fn set_mode(&mut self, mode: ReceiveMode) {
        self.entries.clear();
        self.mode = mode;
    }

    pub fn entry(&self, ip: &IpAddr) -> Option<&PortInfo> {
        self.entries.get(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_to_accept_list(&mut self, addr: SocketAddr) -> Result<()> {
        self.require(ReceiveMode::AcceptSome)?;
        self.add_entry(addr)
    }

    pub fn delete_from_accept_list(&mut self, addr: SocketAddr) -> Result<()> {
        self.require(ReceiveMode::AcceptSome)?;
        self.delete_entry(addr)
    }

    pub fn clear_accept_list(&mut self) {
        if self.mode == ReceiveMode::AcceptSome {
            self.entries.clear();
        }
    }

    pub fn add_to_ignore_list(&mut self, addr: SocketAddr) -> Result<()> {
        self.require(ReceiveMode::IgnoreSome)?;
        self.add_entry(addr)
    }

    pub fn delete_from_ignore_list(&mut self, addr: SocketAddr) -> Result<()> {
        self.require(ReceiveMode::IgnoreSome)?;
        self.delete_entry(addr)
    }

    pub fn clear_ignore_list(&mut self) {
        if self.mode == ReceiveMode::IgnoreSome {
            self.entries.clear();
        }
    }

    fn require(&self, mode: ReceiveMode) -> Result<()> {
        if self.mode != mode {
            return Err(RtpError::DifferentReceiveMode);
        }
        Ok(())
    }

    fn add_entry(&mut self, addr: SocketAddr) -> Result<()> {
        let port = addr.port();
        match self.entries.get_mut(&addr.ip()) {
            Some(info) if port == 0 => {
                info.all = true;
                info.ports.clear();
            }
            Some(info) if info.all => info.ports.retain(|p| *p != port),
            Some(info) => {
                if !info.ports.contains(&port) {
                    info.ports.push(port);
                }
            }
            None => {
                let info = if port == 0 {
                    PortInfo {
                        all: true,
                        ports: Vec::new(),
                    }
                } else {
                    PortInfo {
                        all: false,
                        ports: vec![port],
                    }
                };
                self.entries.add_element(addr.ip(), info)?;
            }
        }
        Ok(())
    }

    fn delete_entry(&mut self, addr: SocketAddr) -> Result<()> {
        let port = addr.port();
        let info = self
            .entries
            .get_mut(&addr.ip())
            .ok_or(RtpError::NoSuchEntry)?;
        if port == 0 {
            info.all = false;
            info.ports.clear();
        } else if info.all {
            // Every port matches; record `port` as an exception.
            if info.ports.contains(&port) {
                return Err(RtpError::NoSuchEntry);
            }
            info.ports.push(port);
        } else {
            let pos = info
                .ports
                .iter()
                .position(|p| *p == port)
                .ok_or(RtpError::NoSuchEntry)?;
            info.ports.remove(pos);
        }
        Ok(())
    }

    /// Receive-mode decision for a datagram from `addr`.
    pub fn should_accept(&self, addr: &SocketAddr) -> bool {
        let hit = self
            .entries
            .get(&addr.ip())
            .is_some_and(|info| info.matches(addr.port()));
        match self.mode {
            ReceiveMode::AcceptAll => true,
            ReceiveMode::AcceptSome => hit,
            ReceiveMode::IgnoreSome => !hit,
        }
    }
}

impl Default for ReceiveFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn accept_all_by_default() {
        let filter = ReceiveFilter::new();
        assert!(filter.should_accept(&addr("1.2.3.4:5000")));
    }

    #[test]
    fn accept_some_specific_ports() {
        let mut filter = ReceiveFilter::new();
        filter.set_mode(ReceiveMode::AcceptSome);
        filter.add_to_accept_list(addr("1.2.3.4:5000")).unwrap();
        assert!(filter.should_accept(&addr("1.2.3.4:5000")));
        assert!(!filter.should_accept(&addr("1.2.3.4:5002")));
        assert!(!filter.should_accept(&addr("1.2.3.5:5000")));
    }

    #[test]
    fn accept_some_all_ports_with_exception() {
        let mut filter = ReceiveFilter::new();
        filter.set_mode(ReceiveMode::AcceptSome);
        filter.add_to_accept_list(addr("1.2.3.4:0")).unwrap();
        assert!(filter.should_accept(&addr("1.2.3.4:9")));
        filter.delete_from_accept_list(addr("1.2.3.4:9")).unwrap();
        assert!(!filter.should_accept(&addr("1.2.3.4:9")));
        assert!(filter.should_accept(&addr("1.2.3.4:10")));
        assert!(matches!(
            filter.delete_from_accept_list(addr("1.2.3.4:9")),
            Err(RtpError::NoSuchEntry)
        ));
        filter.add_to_accept_list(addr("1.2.3.4:9")).unwrap();
        assert!(filter.should_accept(&addr("1.2.3.4:9")));
    }

    #[test]
    fn ignore_some() {
        let mut filter = ReceiveFilter::new();
        filter.set_mode(ReceiveMode::IgnoreSome);
        filter.add_to_ignore_list(addr("1.2.3.4:0")).unwrap();
        assert!(!filter.should_accept(&addr("1.2.3.4:1")));
        assert!(filter.should_accept(&addr("1.2.3.5:1")));
    }

    #[test]
    fn wrong_mode_rejected_without_change() {
        let mut filter = ReceiveFilter::new();
        filter.set_mode(ReceiveMode::IgnoreSome);
        assert!(matches!(
            filter.add_to_accept_list(addr("1.2.3.4:1")),
            Err(RtpError::DifferentReceiveMode)
        ));
        assert!(filter.is_empty());
    }

    #[test]
    fn delete_missing_port_leaves_entry() {
        let mut filter = ReceiveFilter::new();
        filter.set_mode(ReceiveMode::AcceptSome);
        filter.add_to_accept_list(addr("1.2.3.4:5000")).unwrap();
        assert!(filter.delete_from_accept_list(addr("1.2.3.4:6000")).is_err());
        assert!(filter.delete_from_accept_list(addr("9.9.9.9:6000")).is_err());
        assert_eq!(
            filter.entry(&"1.2.3.4".parse().unwrap()),
            Some(&PortInfo {
                all: false,
                ports: vec![5000]
            })
        );
    }

    #[test]
    fn set_mode_always_clears() {
        for (from, to) in [
            (ReceiveMode::AcceptSome, ReceiveMode::AcceptSome),
            (ReceiveMode::AcceptSome, ReceiveMode::IgnoreSome),
            (ReceiveMode::IgnoreSome, ReceiveMode::AcceptAll),
        ] {
            let mut filter = ReceiveFilter::new();
            filter.set_mode(from);
            if from == ReceiveMode::AcceptSome {
                filter.add_to_accept_list(addr("1.2.3.4:5000")).unwrap();
            } else {
                filter.add_to_ignore_list(addr("1.2.3.4:5000")).unwrap();
            }
            filter.set_mode(to);
            assert!(filter.is_empty());
        }
    }
}
