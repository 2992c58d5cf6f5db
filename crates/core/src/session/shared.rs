//! State shared between an [`RtpSession`](super::RtpSession) and its poll
//! thread.
//!
//! Three mutexes guard disjoint parts of the session. When more than one
//! is needed they are taken in the order sources, scheduler, builders and
//! released in reverse; no code path takes them the other way round.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::params::TimeoutMultipliers;
use crate::error::Result;
use crate::handler::SessionHandler;
use crate::packet::PacketBuilder;
use crate::packet::rtcp::RtcpCompoundPacket;
use crate::rtcp::{RtcpBuilder, RtcpScheduler};
use crate::sources::{CollisionList, SourceTable};
use crate::transmitter::Transmitter;

/// Sleep between scheduler checks while waiting to send a BYE.
pub(crate) const BYE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Guarded by the sources lock.
pub(crate) struct SourcesState {
    pub table: SourceTable,
    pub collisions: CollisionList,
    pub bye_packets: VecDeque<RtcpCompoundPacket>,
}

/// Guarded by the builder lock.
pub(crate) struct Builders {
    pub packets: PacketBuilder,
    pub rtcp: RtcpBuilder,
}

pub(crate) struct SessionCore {
    pub transmitter: Arc<dyn Transmitter>,
    pub handler: Arc<dyn SessionHandler>,
    pub sources: Mutex<SourcesState>,
    pub scheduler: Mutex<RtcpScheduler>,
    pub builders: Mutex<Builders>,
    pub accept_own_packets: bool,
    pub sender_report_for_bye: bool,
    pub control_traffic_fraction: f64,
    pub multipliers: TimeoutMultipliers,
}

impl SessionCore {
    fn has_sent_packets(&self) -> bool {
        self.transmitter.num_rtp_packets_sent() != 0 || self.transmitter.num_rtcp_packets_sent() != 0
    }

    /// Time until the scheduler next wants to look at RTCP.
    pub fn rtcp_delay(&self) -> Duration {
        let _sources = self.sources.lock();
        self.scheduler.lock().transmission_delay(Instant::now())
    }

    /// Build a BYE for the current SSRC and queue it, scheduling it when
    /// nothing else is queued.
    fn queue_bye(&self, state: &mut SourcesState, reason: &[u8], now: Instant) -> Result<()> {
        let packet = {
            let builders = self.builders.lock();
            builders.rtcp.build_bye_packet(
                now,
                &builders.packets,
                &state.table,
                reason,
                self.sender_report_for_bye,
            )?
        };
        let len = packet.len();
        state.bye_packets.push_back(packet);
        if state.bye_packets.len() == 1 {
            self.scheduler
                .lock()
                .schedule_bye_packet(len, now, &state.table);
        }
        Ok(())
    }

    /// Send the head of the BYE queue, rescheduling for the next one.
    /// Returns false once the queue is empty.
    fn send_queued_bye(&self, state: &mut SourcesState, now: Instant) -> Result<bool> {
        let Some(packet) = state.bye_packets.pop_front() else {
            return Ok(false);
        };
        self.transmitter.send_rtcp_data(packet.data())?;
        let mut scheduler = self.scheduler.lock();
        scheduler.analyse_outgoing(&packet);
        match state.bye_packets.front() {
            Some(next) => {
                scheduler.schedule_bye_packet(next.len(), now, &state.table);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retire the local SSRC after a collision and take a fresh one.
    fn change_own_ssrc(&self, state: &mut SourcesState, now: Instant) -> Result<()> {
        if self.has_sent_packets() {
            self.queue_bye(state, &[], now)?;
        }
        let (old, new) = {
            let mut builders = self.builders.lock();
            let old = builders.packets.ssrc();
            let table = &state.table;
            let new = builders.packets.create_new_ssrc(|ssrc| table.got_entry(ssrc));
            (old, new)
        };
        self.transmitter.reset_packet_count();
        state.table.delete_own_ssrc()?;
        state.table.create_own_ssrc(new)?;
        tracing::info!(
            old = format_args!("{:#010X}", old),
            new = format_args!("{:#010X}", new),
            "local SSRC changed after collision"
        );
        Ok(())
    }

    /// Account for everything the transmitter has queued, expire stale
    /// state and send RTCP when it is due.
    pub fn process_polled_data(&self) -> Result<()> {
        let mut state = self.sources.lock();
        state.table.clear_own_collision_flag();

        while let Some(raw) = self.transmitter.get_next_packet() {
            let sender = raw.sender();
            let received = raw.receive_time();
            {
                let mut scheduler = self.scheduler.lock();
                state.table.process_raw_packet(
                    raw,
                    self.transmitter.as_ref(),
                    self.accept_own_packets,
                    &mut scheduler,
                )?;
            }

            if state.table.detected_own_collision() {
                state.table.clear_own_collision_flag();
                if state.collisions.update_address(sender, received) {
                    self.change_own_ssrc(&mut state, received)?;
                }
            }
        }

        let now = Instant::now();
        let interval = self
            .scheduler
            .lock()
            .calculate_deterministic_interval(false, &state.table);
        let m = self.multipliers;
        state.table.multiple_timeouts(
            now,
            TimeoutMultipliers::scale(interval, m.sender),
            TimeoutMultipliers::scale(interval, m.bye),
            TimeoutMultipliers::scale(interval, m.member),
            TimeoutMultipliers::scale(interval, m.note),
        );
        state
            .collisions
            .timeout(now, TimeoutMultipliers::scale(interval, m.collision));

        let due = {
            let mut scheduler = self.scheduler.lock();
            scheduler.active_member_decrease(now, &state.table);
            scheduler.is_time(now, &state.table)
        };
        if !due {
            return Ok(());
        }

        if !state.bye_packets.is_empty() {
            self.send_queued_bye(&mut state, now)?;
            return Ok(());
        }

        let packet = {
            let mut builders = self.builders.lock();
            let Builders { packets, rtcp } = &mut *builders;
            rtcp.build_next_packet(now, packets, &mut state.table)?
        };
        self.transmitter.send_rtcp_data(packet.data())?;
        self.scheduler.lock().analyse_outgoing(&packet);
        tracing::trace!(len = packet.len(), "RTCP report sent");
        Ok(())
    }

    /// Queue a BYE and keep sending until the queue drains or `max_wait`
    /// passes. Used while tearing the session down.
    pub fn send_bye_and_wait(&self, max_wait: Duration, reason: &[u8]) -> Result<()> {
        if !self.has_sent_packets() {
            return Ok(());
        }
        let start = Instant::now();
        self.queue_bye(&mut self.sources.lock(), reason, start)?;

        let stop = start + max_wait;
        loop {
            let now = Instant::now();
            let mut done = now > stop;
            {
                let mut state = self.sources.lock();
                let due = self.scheduler.lock().is_time(now, &state.table);
                if due && !self.send_queued_bye(&mut state, now)? {
                    done = true;
                }
            }
            if done {
                return Ok(());
            }
            std::thread::sleep(BYE_CHECK_INTERVAL);
        }
    }
}
