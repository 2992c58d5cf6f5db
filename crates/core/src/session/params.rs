use std::time::Duration;

use crate::packet::RTP_DEFAULT_PACKET_SIZE;
use crate::transmitter::ReceiveMode;

/// Session-level configuration handed to [`RtpSession::create`](super::RtpSession::create).
///
/// Timeouts are expressed as multiples of the deterministic RTCP interval:
/// a sender that has been quiet for `sender_timeout_multiplier` intervals
/// stops counting as a sender, a member silent for
/// `member_timeout_multiplier` intervals is removed, and so on.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Run a background thread that waits for and processes inbound data.
    pub use_poll_thread: bool,
    pub max_packet_size: usize,
    pub receive_mode: ReceiveMode,
    /// Process packets that originate from this session's own transmitter.
    pub accept_own_packets: bool,
    /// Seconds per RTP timestamp tick of the local media clock.
    pub own_timestamp_unit: f64,
    /// Session bandwidth in bytes per second.
    pub session_bandwidth: f64,
    /// Share of the session bandwidth used for RTCP.
    pub control_traffic_fraction: f64,
    /// Share of the RTCP bandwidth reserved for active senders.
    pub sender_control_fraction: f64,
    pub min_rtcp_interval: Duration,
    pub use_half_rtcp_interval_at_startup: bool,
    pub request_immediate_bye: bool,
    /// Lead BYE packets with an SR when the local participant is a sender.
    pub sender_report_for_bye: bool,
    pub sender_timeout_multiplier: f64,
    pub member_timeout_multiplier: f64,
    pub bye_timeout_multiplier: f64,
    pub collision_timeout_multiplier: f64,
    pub note_timeout_multiplier: f64,
    /// Explicit CNAME. Built as `login@host` when `None`.
    pub cname: Option<String>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            use_poll_thread: false,
            max_packet_size: RTP_DEFAULT_PACKET_SIZE,
            receive_mode: ReceiveMode::AcceptAll,
            accept_own_packets: false,
            own_timestamp_unit: 1.0 / 8000.0,
            session_bandwidth: 10000.0,
            control_traffic_fraction: 0.05,
            sender_control_fraction: 0.25,
            min_rtcp_interval: Duration::from_secs(5),
            use_half_rtcp_interval_at_startup: true,
            request_immediate_bye: true,
            sender_report_for_bye: true,
            sender_timeout_multiplier: 2.0,
            member_timeout_multiplier: 5.0,
            bye_timeout_multiplier: 1.0,
            collision_timeout_multiplier: 10.0,
            note_timeout_multiplier: 25.0,
            cname: None,
        }
    }
}

/// Timeout multipliers copied out of [`SessionParams`] at creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutMultipliers {
    pub sender: f64,
    pub member: f64,
    pub bye: f64,
    pub collision: f64,
    pub note: f64,
}

impl From<&SessionParams> for TimeoutMultipliers {
    fn from(params: &SessionParams) -> Self {
        Self {
            sender: params.sender_timeout_multiplier,
            member: params.member_timeout_multiplier,
            bye: params.bye_timeout_multiplier,
            collision: params.collision_timeout_multiplier,
            note: params.note_timeout_multiplier,
        }
    }
}

impl TimeoutMultipliers {
    /// Scale `interval`, treating negative or non-finite multipliers as zero.
    pub fn scale(interval: Duration, multiplier: f64) -> Duration {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(interval.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
    }
}
