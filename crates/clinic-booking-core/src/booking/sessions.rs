//! Session capacity, time window and provider session management.

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::info;

use super::error::{BookingError, BookingResult};
use crate::clock::Clock;
use crate::db;
use crate::models::{CapacityInfo, ClinicSession, Period, SessionStatus};

pub struct SessionStore<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

impl<'c> SessionStore<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        Self { conn, clock }
    }

    pub fn session(&self, session_id: i64) -> BookingResult<ClinicSession> {
        db::fetch_session(self.conn, session_id)?
            .ok_or_else(|| BookingError::not_found("session", session_id))
    }

    /// Capacity snapshot. Pure read; the stored status is reported as is.
    pub fn capacity_info(&self, session_id: i64) -> BookingResult<CapacityInfo> {
        let session = self.session(session_id)?;
        let active_booked = db::count_active_bookings(self.conn, session_id)?;
        Ok(CapacityInfo {
            session_id,
            capacity: session.capacity,
            active_booked,
            status: session.status,
            window: session.window(),
        })
    }

    /// Whether the session's window is still ahead of or around `now`.
    ///
    /// An elapsed window is reconciled to `Stopped` as a separate write.
    pub fn is_within_booking_window(&self, session_id: i64) -> BookingResult<bool> {
        let session = self.session(session_id)?;
        self.reconcile_session_status(&session)?;
        Ok(!session.is_past_window(self.clock.now()))
    }

    /// Flip an active session whose window has ended to `Stopped`.
    /// Idempotent; returns whether anything changed.
    pub fn reconcile_session_status(&self, session: &ClinicSession) -> BookingResult<bool> {
        if !session.is_active() || !session.is_past_window(self.clock.now()) {
            return Ok(false);
        }
        let changed =
            db::set_session_status(self.conn, session.session_id, SessionStatus::Stopped)?;
        if changed {
            info!(session_id = session.session_id, "session window elapsed, stopped");
        }
        Ok(changed)
    }

    pub fn create_session(
        &self,
        provider_id: i64,
        date: NaiveDate,
        period: Period,
        capacity: i64,
    ) -> BookingResult<ClinicSession> {
        validate_capacity(capacity)?;
        let session = db::insert_session(self.conn, provider_id, date, period, capacity)?;
        info!(
            session_id = session.session_id,
            provider_id,
            %date,
            period = period.as_str(),
            capacity,
            "session created"
        );
        Ok(session)
    }

    /// Provider edit. Capacity may drop below the current booking count;
    /// existing bookings are kept and new ones are refused until it frees up.
    pub fn update_session(
        &self,
        provider_id: i64,
        session_id: i64,
        date: NaiveDate,
        period: Period,
        capacity: i64,
    ) -> BookingResult<ClinicSession> {
        validate_capacity(capacity)?;
        if !db::update_session_details(self.conn, provider_id, session_id, date, period, capacity)? {
            return Err(BookingError::not_found("session", session_id));
        }
        info!(session_id, provider_id, "session updated");
        self.session(session_id)
    }

    pub fn cancel_session(&self, provider_id: i64, session_id: i64) -> BookingResult<ClinicSession> {
        let session = self.session(session_id)?;
        if session.provider_id != provider_id {
            return Err(BookingError::not_found("session", session_id));
        }
        if db::set_session_status(self.conn, session_id, SessionStatus::Stopped)? {
            info!(session_id, provider_id, "session cancelled");
        }
        self.session(session_id)
    }

    pub fn sessions_for_provider(&self, provider_id: i64) -> BookingResult<Vec<ClinicSession>> {
        Ok(db::sessions_for_provider(self.conn, provider_id)?)
    }

    /// Stop every active session whose window has ended. Returns the ids
    /// that changed.
    pub fn close_elapsed_sessions(&self) -> BookingResult<Vec<i64>> {
        let mut closed = Vec::new();
        for session in db::elapsed_active_sessions(self.conn, self.clock.now())? {
            if self.reconcile_session_status(&session)? {
                closed.push(session.session_id);
            }
        }
        Ok(closed)
    }
}

fn validate_capacity(capacity: i64) -> BookingResult<()> {
    if capacity <= 0 {
        return Err(BookingError::InvalidInput(format!(
            "capacity must be positive, got {capacity}"
        )));
    }
    Ok(())
}
