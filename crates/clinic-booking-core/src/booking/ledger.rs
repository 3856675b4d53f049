//! Append-only status ledger.

use chrono::Duration;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use super::error::BookingResult;
use crate::audit::compute_event_hash;
use crate::clock::Clock;
use crate::db;
use crate::models::{Actor, Status, StatusEvent};

/// Writes and reads status events.
///
/// Appends do not validate transitions; callers check
/// `Status::can_transition_to` first.
pub struct StatusLedger<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

impl<'c> StatusLedger<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        Self { conn, clock }
    }

    /// Current status, or `None` if the appointment has no events.
    pub fn latest_status(&self, appt_id: i64) -> BookingResult<Option<Status>> {
        Ok(db::latest_event(self.conn, appt_id)?.map(|e| e.to_status))
    }

    /// Current status as a fold over the full history.
    pub fn current_status(&self, appt_id: i64) -> BookingResult<Status> {
        let history = self.history(appt_id)?;
        Ok(Status::fold(&history))
    }

    pub fn history(&self, appt_id: i64) -> BookingResult<Vec<StatusEvent>> {
        Ok(db::event_history(self.conn, appt_id)?)
    }

    /// Append one event, linked to the appointment's previous event.
    ///
    /// `changed_at` is strictly later than every event already in the
    /// ledger, so the per-appointment order by time matches the order by
    /// `seq` even when the clock stalls or steps back.
    pub fn append_event(
        &self,
        appt_id: i64,
        from_status: Option<Status>,
        to_status: Status,
        changed_by: Actor,
    ) -> BookingResult<StatusEvent> {
        let previous = db::latest_event(self.conn, appt_id)?;
        let floor = db::latest_changed_at(self.conn)?;

        let now = self.clock.now();
        let changed_at = match floor {
            Some(floor) if now <= floor => floor + Duration::microseconds(1),
            _ => now,
        };

        let mut event = StatusEvent {
            event_id: Uuid::new_v4().to_string(),
            appt_id,
            seq: previous.as_ref().map_or(1, |p| p.seq + 1),
            from_status,
            to_status,
            changed_by,
            changed_at,
            prev_hash: previous.map(|p| p.event_hash).unwrap_or_default(),
            event_hash: String::new(),
        };
        event.event_hash = compute_event_hash(&event)?;

        db::insert_event(self.conn, &event)?;
        debug!(
            appt_id,
            seq = event.seq,
            from = ?from_status,
            to = %to_status,
            by = %changed_by,
            "status event appended"
        );
        Ok(event)
    }
}
