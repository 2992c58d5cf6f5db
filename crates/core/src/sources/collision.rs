use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Sender addresses that recently collided with the local SSRC.
///
/// A collision from an address already on the list is a repeat of a
/// loop or a misbehaving peer, not a fresh conflict, so the session only
/// changes SSRC the first time an address shows up (RFC 3550 §8.2).
#[derive(Debug, Default)]
pub struct CollisionList {
    entries: Vec<(SocketAddr, Instant)>,
}

impl CollisionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a collision from `addr`; returns true if the address was new.
    pub fn update_address(&mut self, addr: SocketAddr, time: Instant) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(a, _)| *a == addr) {
            entry.1 = time;
            return false;
        }
        self.entries.push((addr, time));
        true
    }

    pub fn has_address(&self, addr: &SocketAddr) -> bool {
        self.entries.iter().any(|(a, _)| a == addr)
    }

    /// Forget addresses that have not collided for longer than `delay`.
    pub fn timeout(&mut self, now: Instant, delay: Duration) {
        self.entries
            .retain(|(_, seen)| now.saturating_duration_since(*seen) <= delay);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
