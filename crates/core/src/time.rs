//! Wallclock helpers for RTCP sender reports.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp (RFC 3550 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTime {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTime {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    /// Middle 32 bits, as carried in the LSR field of report blocks.
    pub fn compact(&self) -> u32 {
        ((self.seconds & 0xFFFF) << 16) | (self.fraction >> 16)
    }
}

/// Express a duration in 1/65536 second units (DLSR field).
pub fn to_compact_duration(d: Duration) -> u32 {
    let units = d.as_secs_f64() * 65536.0;
    units.min(u32::MAX as f64) as u32
}
