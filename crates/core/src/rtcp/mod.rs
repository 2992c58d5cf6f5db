//! RTCP report generation and transmission timing.

mod builder;
mod scheduler;

pub use builder::RtcpBuilder;
pub use scheduler::{RtcpScheduler, RtcpSchedulerParams};
