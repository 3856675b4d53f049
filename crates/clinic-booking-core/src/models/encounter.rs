//! Encounter edit lease model.

use serde::{Deserialize, Serialize};

/// Exclusive, time-bounded right to edit one encounter's notes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterLease {
    pub enct_id: i64,
    /// Provider holding the lease
    pub holder: i64,
    /// Epoch milliseconds
    pub acquired_at_ms: i64,
    /// Epoch milliseconds; the lease is free from this instant on
    pub expires_at_ms: i64,
}

impl EncounterLease {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn is_held_by(&self, holder: i64, now_ms: i64) -> bool {
        self.holder == holder && !self.is_expired(now_ms)
    }
}
