//! RTCP transmission interval computation (RFC 3550 §6.3, Appendix A.7).
//!
//! The scheduler keeps the running average compound packet size and the
//! previous/next transmission instants. Callers ask [`RtcpScheduler::is_time`]
//! on every processing pass; the timer is reconsidered against the current
//! membership before a report is allowed out.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Result, RtpError};
use crate::packet::rtcp::RtcpCompoundPacket;
use crate::sources::SourceTable;

/// `e - 3/2`, compensating for the timer reconsideration bias.
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Average compound size assumed before any RTCP has been seen.
const INITIAL_AVERAGE_SIZE: f64 = 1000.0;

/// Interval used when no RTCP bandwidth is available.
const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Above this membership BYE packets always use back-off.
const IMMEDIATE_BYE_MEMBER_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct RtcpSchedulerParams {
    /// RTCP bandwidth in bytes per second.
    pub rtcp_bandwidth: f64,
    /// Share of the RTCP bandwidth reserved for senders.
    pub sender_fraction: f64,
    pub min_interval: Duration,
    /// Halve the minimum interval until the first report has been sent.
    pub half_at_startup: bool,
    /// Send a BYE immediately in small sessions instead of backing off.
    pub immediate_bye: bool,
}

impl Default for RtcpSchedulerParams {
    fn default() -> Self {
        Self {
            rtcp_bandwidth: 500.0,
            sender_fraction: 0.25,
            min_interval: Duration::from_secs(5),
            half_at_startup: true,
            immediate_bye: true,
        }
    }
}

impl RtcpSchedulerParams {
    pub fn validate(&self) -> Result<()> {
        if self.rtcp_bandwidth.is_nan() || self.rtcp_bandwidth < 0.0 {
            return Err(RtpError::SchedulerParameter("RTCP bandwidth must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.sender_fraction) {
            return Err(RtpError::SchedulerParameter(
                "sender fraction must lie between 0 and 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RtcpScheduler {
    params: RtcpSchedulerParams,
    header_overhead: usize,
    first_call: bool,
    has_sent_rtcp: bool,
    avg_rtcp_size: f64,
    prev_rtcp_time: Instant,
    next_rtcp_time: Instant,
    p_members: usize,
    bye_scheduled: bool,
    send_bye_now: bool,
    avg_bye_size: f64,
    bye_members: usize,
}

impl RtcpScheduler {
    pub fn new(header_overhead: usize) -> Self {
        let now = Instant::now();
        Self {
            params: RtcpSchedulerParams::default(),
            header_overhead,
            first_call: true,
            has_sent_rtcp: false,
            avg_rtcp_size: INITIAL_AVERAGE_SIZE,
            prev_rtcp_time: now,
            next_rtcp_time: now,
            p_members: 0,
            bye_scheduled: false,
            send_bye_now: false,
            avg_bye_size: 0.0,
            bye_members: 0,
        }
    }

    pub fn set_parameters(&mut self, params: &RtcpSchedulerParams) -> Result<()> {
        params.validate()?;
        self.params = params.clone();
        Ok(())
    }

    pub fn parameters(&self) -> &RtcpSchedulerParams {
        &self.params
    }

    pub fn set_header_overhead(&mut self, overhead: usize) {
        self.header_overhead = overhead;
    }

    /// Forget all timing state, as for a fresh session.
    pub fn reset(&mut self) {
        let overhead = self.header_overhead;
        let params = self.params.clone();
        *self = Self::new(overhead);
        self.params = params;
    }

    /// Fold a received compound packet into the size averages.
    pub fn analyse_incoming(&mut self, packet: &RtcpCompoundPacket) {
        let size = (packet.len() + self.header_overhead) as f64;
        if !packet.has_bye() {
            self.avg_rtcp_size = size / 16.0 + self.avg_rtcp_size * 15.0 / 16.0;
        } else if self.bye_scheduled {
            self.avg_bye_size = size / 16.0 + self.avg_bye_size * 15.0 / 16.0;
            self.bye_members += 1;
        }
    }

    /// Fold a compound packet this session just sent into the averages.
    pub fn analyse_outgoing(&mut self, packet: &RtcpCompoundPacket) {
        if !packet.has_bye() {
            let size = (packet.len() + self.header_overhead) as f64;
            self.avg_rtcp_size = size / 16.0 + self.avg_rtcp_size * 15.0 / 16.0;
        }
        self.has_sent_rtcp = true;
    }

    fn min_interval(&self) -> f64 {
        let tmin = self.params.min_interval.as_secs_f64();
        if self.params.half_at_startup && !self.has_sent_rtcp {
            tmin / 2.0
        } else {
            tmin
        }
    }

    /// RTCP interval without the random factor (the `Td` of RFC 3550 §6.3.1).
    pub fn calculate_deterministic_interval(&self, sender: bool, sources: &SourceTable) -> Duration {
        let senders = sources.sender_count() as f64;
        let members = sources.active_member_count().max(1) as f64;
        let bandwidth = self.params.rtcp_bandwidth;
        let fraction = self.params.sender_fraction;

        let (n, share) = if senders > 0.0 && senders <= fraction * members {
            if sender {
                (senders, fraction * bandwidth)
            } else {
                (members - senders, (1.0 - fraction) * bandwidth)
            }
        } else {
            (members, bandwidth)
        };
        let interval = (n * self.avg_rtcp_size / share).max(self.min_interval());
        clamp_interval(interval)
    }

    /// Randomised interval in `[0.5, 1.5)` times the deterministic one,
    /// divided by `e - 3/2`.
    pub fn calculate_transmission_interval(&self, sender: bool, sources: &SourceTable) -> Duration {
        let td = self.calculate_deterministic_interval(sender, sources);
        randomize(td)
    }

    fn bye_interval(&self) -> Duration {
        if !self.bye_scheduled || self.send_bye_now {
            return Duration::ZERO;
        }
        let share = (1.0 - self.params.sender_fraction) * self.params.rtcp_bandwidth;
        let interval = (self.bye_members as f64 * self.avg_bye_size / share).max(self.min_interval());
        randomize(clamp_interval(interval))
    }

    fn we_are_sender(sources: &SourceTable) -> bool {
        sources.own_source().is_some_and(|s| s.is_sender())
    }

    /// Whether a compound packet should be sent now.
    ///
    /// The first call only arms the timer. Returning true consumes the
    /// transmission slot and schedules the next one.
    pub fn is_time(&mut self, now: Instant, sources: &SourceTable) -> bool {
        if self.first_call {
            self.first_call = false;
            self.prev_rtcp_time = now;
            self.p_members = sources.active_member_count();
            self.next_rtcp_time =
                now + self.calculate_transmission_interval(Self::we_are_sender(sources), sources);
            return false;
        }
        if now < self.next_rtcp_time {
            return false;
        }

        let check = if self.bye_scheduled {
            self.bye_interval()
        } else {
            self.calculate_transmission_interval(Self::we_are_sender(sources), sources)
        };
        let reconsidered = self.prev_rtcp_time + check;
        if reconsidered <= now {
            self.bye_scheduled = false;
            self.send_bye_now = false;
            self.prev_rtcp_time = now;
            self.p_members = sources.active_member_count();
            self.next_rtcp_time =
                now + self.calculate_transmission_interval(Self::we_are_sender(sources), sources);
            return true;
        }
        self.next_rtcp_time = reconsidered;
        false
    }

    /// Arrange for a BYE of `packet_size` bytes to go out (RFC 3550 §6.3.7).
    pub fn schedule_bye_packet(&mut self, packet_size: usize, now: Instant, sources: &SourceTable) {
        if self.bye_scheduled {
            return;
        }
        if self.first_call {
            self.first_call = false;
            self.p_members = sources.active_member_count();
        }
        self.bye_scheduled = true;
        self.avg_bye_size = (packet_size + self.header_overhead) as f64;
        self.send_bye_now = self.params.immediate_bye
            && sources.active_member_count() < IMMEDIATE_BYE_MEMBER_LIMIT;
        self.bye_members = 1;
        self.prev_rtcp_time = now;
        self.next_rtcp_time = now + self.bye_interval();
    }

    /// Pull the timer in after members left (RFC 3550 §6.3.4).
    pub fn active_member_decrease(&mut self, now: Instant, sources: &SourceTable) {
        let members = sources.active_member_count();
        if self.first_call || self.p_members == 0 || members >= self.p_members {
            return;
        }
        let ratio = members as f64 / self.p_members as f64;
        let until_next = self.next_rtcp_time.saturating_duration_since(now);
        let since_prev = now.saturating_duration_since(self.prev_rtcp_time);
        self.next_rtcp_time = now + until_next.mul_f64(ratio);
        self.prev_rtcp_time = now.checked_sub(since_prev.mul_f64(ratio)).unwrap_or(now);
        self.p_members = members;
    }

    /// Time left until the next scheduled check.
    pub fn transmission_delay(&self, now: Instant) -> Duration {
        if self.first_call {
            return Duration::ZERO;
        }
        self.next_rtcp_time.saturating_duration_since(now)
    }

    pub fn is_bye_scheduled(&self) -> bool {
        self.bye_scheduled
    }
}

fn clamp_interval(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds < MAX_INTERVAL.as_secs_f64() {
        Duration::from_secs_f64(seconds.max(0.0))
    } else {
        MAX_INTERVAL
    }
}

fn randomize(td: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.5..1.5);
    td.mul_f64(factor / COMPENSATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SourceTable {
        let mut t = SourceTable::new();
        t.create_own_ssrc(0x1234).unwrap();
        t
    }

    fn scheduler() -> RtcpScheduler {
        let mut s = RtcpScheduler::new(28);
        s.set_parameters(&RtcpSchedulerParams {
            rtcp_bandwidth: 500.0,
            ..Default::default()
        })
        .unwrap();
        s
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut s = RtcpScheduler::new(28);
        let bad = RtcpSchedulerParams {
            sender_fraction: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            s.set_parameters(&bad),
            Err(RtpError::SchedulerParameter(_))
        ));
        let bad = RtcpSchedulerParams {
            rtcp_bandwidth: -1.0,
            ..Default::default()
        };
        assert!(s.set_parameters(&bad).is_err());
        assert_eq!(s.parameters(), &RtcpSchedulerParams::default());
    }

    #[test]
    fn deterministic_interval_floor() {
        let s = scheduler();
        let t = table();
        // One member, 1000-byte average at 500 B/s would be 2 s; the halved
        // 5 s minimum wins.
        assert_eq!(
            s.calculate_deterministic_interval(false, &t),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn zero_bandwidth_caps_interval() {
        let mut s = RtcpScheduler::new(28);
        s.set_parameters(&RtcpSchedulerParams {
            rtcp_bandwidth: 0.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            s.calculate_deterministic_interval(false, &table()),
            MAX_INTERVAL
        );
    }

    #[test]
    fn transmission_interval_is_randomised_within_bounds() {
        let s = scheduler();
        let t = table();
        let td = s.calculate_deterministic_interval(false, &t).as_secs_f64();
        for _ in 0..50 {
            let ti = s.calculate_transmission_interval(false, &t).as_secs_f64();
            assert!(ti >= td * 0.5 / COMPENSATION - 1e-9);
            assert!(ti < td * 1.5 / COMPENSATION + 1e-9);
        }
    }

    #[test]
    fn first_call_arms_timer() {
        let mut s = scheduler();
        let t = table();
        let now = Instant::now();
        assert!(!s.is_time(now, &t));
        assert!(s.transmission_delay(now) > Duration::ZERO);
        assert!(!s.is_time(now, &t));
        assert!(s.is_time(now + Duration::from_secs(60), &t));
    }

    #[test]
    fn immediate_bye_in_small_session() {
        let mut s = scheduler();
        let t = table();
        let now = Instant::now();
        s.schedule_bye_packet(40, now, &t);
        assert!(s.is_bye_scheduled());
        assert!(s.is_time(now, &t));
        assert!(!s.is_bye_scheduled());
    }

    #[test]
    fn bye_backoff_without_immediate() {
        let mut s = RtcpScheduler::new(28);
        s.set_parameters(&RtcpSchedulerParams {
            immediate_bye: false,
            ..Default::default()
        })
        .unwrap();
        let t = table();
        let now = Instant::now();
        s.schedule_bye_packet(40, now, &t);
        assert!(!s.is_time(now, &t));
        assert!(s.is_time(now + Duration::from_secs(60), &t));
    }

    #[test]
    fn outgoing_marks_sent() {
        let mut s = scheduler();
        let t = table();
        let before = s.calculate_deterministic_interval(false, &t);
        let packet = RtcpCompoundPacket::build(
            vec![crate::packet::rtcp::RtcpPacket::ReceiverReport {
                ssrc: 1,
                reports: Vec::new(),
            }],
            1400,
        )
        .unwrap();
        s.analyse_outgoing(&packet);
        // Full minimum interval once a report has gone out.
        assert_eq!(s.calculate_deterministic_interval(false, &t), before * 2);
    }

    #[test]
    fn reset_rearms() {
        let mut s = scheduler();
        let t = table();
        let now = Instant::now();
        s.is_time(now, &t);
        s.reset();
        assert_eq!(s.transmission_delay(now), Duration::ZERO);
        assert_eq!(s.parameters().rtcp_bandwidth, 500.0);
    }
}
