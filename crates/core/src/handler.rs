//! Application hooks for session events.
//!
//! Install an implementation with [`RtpSession::set_handler`](crate::RtpSession::set_handler)
//! before `create`. Every method has an empty default, so implementors
//! only override what they care about.
//!
//! Source events fire while the session's participant table is locked,
//! either on the caller's thread inside `poll` or on the poll thread.
//! A handler must not call back into the session it is attached to.

use crate::error::RtpError;
use crate::packet::{RtcpCompoundPacket, RtpPacket};
use crate::sources::{SenderAddress, SourceData};

pub trait SessionHandler: Send + Sync {
    /// A participant entered the table.
    fn on_new_source(&self, _source: &SourceData) {}

    /// A participant is about to leave the table.
    fn on_remove_source(&self, _source: &SourceData) {}

    /// An RTP packet passed the collision check and is about to be queued.
    fn on_rtp_packet(&self, _packet: &RtpPacket, _sender: &SenderAddress) {}

    fn on_rtcp_compound_packet(&self, _packet: &RtcpCompoundPacket, _sender: &SenderAddress) {}

    fn on_app_packet(
        &self,
        _source: &SourceData,
        _subtype: u8,
        _name: [u8; 4],
        _data: &[u8],
        _sender: &SenderAddress,
    ) {
    }

    /// `source` said goodbye.
    fn on_bye_packet(&self, _source: &SourceData) {}

    /// Packets for `source` arrived from an address other than the one it
    /// was first seen at. The packet was dropped.
    fn on_ssrc_collision(&self, _source: &SourceData, _sender: &SenderAddress, _is_rtp: bool) {}

    /// `source` announced a CNAME different from the one on record. The
    /// recorded CNAME is kept.
    fn on_cname_collision(&self, _source: &SourceData, _sender: &SenderAddress, _cname: &[u8]) {}

    /// `source` was silent for longer than the member timeout.
    fn on_timeout(&self, _source: &SourceData) {}

    /// The grace period after a BYE from `source` ran out.
    fn on_bye_timeout(&self, _source: &SourceData) {}

    /// The NOTE item of `source` expired and was cleared.
    fn on_note_timeout(&self, _source: &SourceData) {}

    /// The poll thread hit `error` and stopped.
    fn on_poll_thread_error(&self, _error: &RtpError) {}

    /// The poll thread finished one processing pass.
    fn on_poll_thread_step(&self) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}
