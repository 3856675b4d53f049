//! Verification results.

use serde::{Deserialize, Serialize};

use crate::models::StatusEvent;

/// First inconsistency found in one appointment's chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainBreak {
    pub appt_id: i64,
    pub seq: i64,
    pub event_id: String,
    pub reason: String,
}

impl ChainBreak {
    pub fn new(event: &StatusEvent, reason: impl Into<String>) -> Self {
        Self {
            appt_id: event.appt_id,
            seq: event.seq,
            event_id: event.event_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Summary of a verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainReport {
    pub appointments_checked: usize,
    pub events_checked: usize,
    /// Hash of the last event checked (single-appointment runs only)
    pub head_hash: Option<String>,
    pub breaks: Vec<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }

    pub(crate) fn merge(&mut self, other: ChainReport) {
        self.appointments_checked += other.appointments_checked;
        self.events_checked += other.events_checked;
        self.breaks.extend(other.breaks);
    }
}
