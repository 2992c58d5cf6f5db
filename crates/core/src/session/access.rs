use std::ops::Deref;

use parking_lot::MutexGuard;

use super::shared::SourcesState;
use crate::packet::RtpPacket;
use crate::sources::{SourceData, SourceTable};

/// Exclusive view of the session's participants.
///
/// Holds the sources lock for as long as it lives, so a poll thread cannot
/// change the table mid-iteration. Dropping it ends the access. Read-only
/// queries are available through `Deref<Target = SourceTable>`.
pub struct SourceAccess<'a> {
    state: MutexGuard<'a, SourcesState>,
}

impl<'a> SourceAccess<'a> {
    pub(crate) fn new(state: MutexGuard<'a, SourcesState>) -> Self {
        Self { state }
    }

    pub fn goto_first_source(&mut self) -> bool {
        self.state.table.goto_first_source()
    }

    pub fn goto_next_source(&mut self) -> bool {
        self.state.table.goto_next_source()
    }

    pub fn goto_previous_source(&mut self) -> bool {
        self.state.table.goto_previous_source()
    }

    pub fn goto_first_source_with_data(&mut self) -> bool {
        self.state.table.goto_first_source_with_data()
    }

    pub fn goto_next_source_with_data(&mut self) -> bool {
        self.state.table.goto_next_source_with_data()
    }

    pub fn goto_previous_source_with_data(&mut self) -> bool {
        self.state.table.goto_previous_source_with_data()
    }

    pub fn current_source_info(&self) -> Option<&SourceData> {
        self.state.table.current_source_info()
    }

    /// Next queued RTP packet of the source under the cursor.
    pub fn get_next_packet(&mut self) -> Option<RtpPacket> {
        self.state.table.get_next_packet()
    }

    pub fn flush_packets(&mut self) {
        self.state.table.flush_packets();
    }
}

impl Deref for SourceAccess<'_> {
    type Target = SourceTable;

    fn deref(&self) -> &SourceTable {
        &self.state.table
    }
}
