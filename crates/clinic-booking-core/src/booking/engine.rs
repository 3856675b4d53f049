//! Booking engine.
//!
//! Every mutating operation runs in one `IMMEDIATE` transaction that first
//! locks the affected session rows (see [`LockSet`]). Rejections are
//! detected before any appointment or ledger write, so a rejected request
//! commits at most the idempotent reconciliations it performed (a stopped
//! session, a materialised or lapsed ban). Any other failure rolls back.

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use super::cascade::NoShowCascade;
use super::error::{BookingError, BookingResult};
use super::ledger::StatusLedger;
use super::lock_order::LockSet;
use super::penalty::PenaltyTracker;
use super::sessions::SessionStore;
use crate::clock::Clock;
use crate::config::PenaltyPolicy;
use crate::db::{self, Database};
use crate::models::{
    Actor, AppointmentView, CapacityInfo, ClinicSession, PatientStanding, Period, Status,
    StatusEvent,
};

/// Outcome of settling an ended session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub session_id: i64,
    /// Appointments still booked at settlement, now `NoShow`
    pub marked_no_show: Vec<i64>,
    /// Appointments newly counted against their patient
    pub penalised: Vec<i64>,
}

/// Components bound to one connection (usually an open transaction).
struct Scope<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
    policy: &'c PenaltyPolicy,
}

impl<'c> Scope<'c> {
    fn sessions(&self) -> SessionStore<'c> {
        SessionStore::new(self.conn, self.clock)
    }

    fn ledger(&self) -> StatusLedger<'c> {
        StatusLedger::new(self.conn, self.clock)
    }

    fn cascade(&self) -> NoShowCascade<'c> {
        NoShowCascade::new(self.conn, self.clock)
    }

    fn penalties(&self) -> PenaltyTracker<'c> {
        PenaltyTracker::new(self.conn, self.clock, self.policy)
    }

    fn appointment(&self, appt_id: i64) -> BookingResult<AppointmentView> {
        db::fetch_appointment(self.conn, appt_id)?
            .ok_or_else(|| BookingError::not_found("appointment", appt_id))
    }

    /// Appointment owned by `patient_id`; a mismatch reads as missing.
    fn owned_appointment(&self, appt_id: i64, patient_id: i64) -> BookingResult<AppointmentView> {
        let view = self.appointment(appt_id)?;
        if view.appointment.patient_id != patient_id {
            return Err(BookingError::not_found("appointment", appt_id));
        }
        Ok(view)
    }

    fn check_transition(from: Status, to: Status) -> BookingResult<()> {
        if !from.can_transition_to(to) {
            return Err(BookingError::IllegalTransition { from, to });
        }
        Ok(())
    }
}

pub struct BookingEngine<'a> {
    db: &'a mut Database,
    clock: &'a dyn Clock,
    policy: &'a PenaltyPolicy,
}

impl<'a> BookingEngine<'a> {
    pub fn new(db: &'a mut Database, clock: &'a dyn Clock, policy: &'a PenaltyPolicy) -> Self {
        Self { db, clock, policy }
    }

    fn read(&self) -> Scope<'_> {
        Scope {
            conn: self.db.conn(),
            clock: self.clock,
            policy: self.policy,
        }
    }

    fn write<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&Scope<'_>) -> BookingResult<T>,
    ) -> BookingResult<T> {
        let tx = self.db.transaction()?;
        let scope = Scope {
            conn: &tx,
            clock: self.clock,
            policy: self.policy,
        };
        let result = f(&scope);
        finish(tx, op, result)
    }

    // ------------------------------------------------------------------
    // Patient operations
    // ------------------------------------------------------------------

    /// Book `patient_id` into `session_id`.
    ///
    /// Reuses the patient's cancelled appointment in the session if there
    /// is one, so each (patient, session) pair keeps one identity.
    pub fn create(&mut self, patient_id: i64, session_id: i64) -> BookingResult<AppointmentView> {
        let _span = info_span!("create", patient_id, session_id).entered();

        self.write("create", |s| {
            LockSet::of([session_id]).acquire(s.conn)?;
            let session = s.sessions().session(session_id)?;

            let ban = s.penalties().reconcile_ban(patient_id)?;
            if let Some(until) = ban.banned_until() {
                return Err(BookingError::Banned { until });
            }

            let reusable = db::appointment_for_pair(s.conn, patient_id, session_id)?;
            if reusable.as_ref().is_some_and(|v| v.status.holds_capacity()) {
                return Err(BookingError::DuplicateBooking {
                    patient_id,
                    session_id,
                });
            }

            s.sessions().reconcile_session_status(&session)?;
            if !session.accepts_bookings(s.clock.now()) {
                return Err(BookingError::SessionClosed(session_id));
            }

            let active = db::count_active_bookings(s.conn, session_id)?;
            if active >= session.capacity {
                return Err(BookingError::SessionFull(session_id));
            }
            let slot_seq = active + 1;

            let booked_by = Actor::Provider(session.provider_id);
            let appt_id = match &reusable {
                Some(previous) => {
                    let appt_id = previous.appt_id();
                    db::place_appointment(s.conn, appt_id, session_id, slot_seq)?;
                    s.ledger()
                        .append_event(appt_id, Some(Status::Cancelled), Status::Booked, booked_by)?;
                    appt_id
                }
                None => {
                    let appt = db::insert_appointment(
                        s.conn,
                        patient_id,
                        session_id,
                        slot_seq,
                        s.clock.now(),
                    )?;
                    s.ledger()
                        .append_event(appt.appt_id, None, Status::Booked, booked_by)?;
                    appt.appt_id
                }
            };

            info!(appt_id, slot_seq, rebooked = reusable.is_some(), "appointment booked");
            s.appointment(appt_id)
        })
    }

    pub fn cancel(&mut self, appt_id: i64, patient_id: i64) -> BookingResult<AppointmentView> {
        let _span = info_span!("cancel", appt_id, patient_id).entered();

        self.write("cancel", |s| {
            let view = s.owned_appointment(appt_id, patient_id)?;
            let session_id = view.appointment.session_id;
            LockSet::of([session_id]).acquire(s.conn)?;
            Scope::check_transition(view.status, Status::Cancelled)?;

            let actor = Actor::Patient(patient_id);
            s.ledger()
                .append_event(appt_id, Some(view.status), Status::Cancelled, actor)?;
            s.penalties().record_cancellation(patient_id, appt_id)?;
            s.cascade().run(session_id, actor)?;

            info!(session_id, "appointment cancelled");
            s.appointment(appt_id)
        })
    }

    pub fn checkin(&mut self, appt_id: i64, patient_id: i64) -> BookingResult<AppointmentView> {
        let _span = info_span!("checkin", appt_id, patient_id).entered();

        self.write("checkin", |s| {
            let view = s.owned_appointment(appt_id, patient_id)?;
            let session_id = view.appointment.session_id;
            LockSet::of([session_id]).acquire(s.conn)?;
            Scope::check_transition(view.status, Status::CheckedIn)?;

            let actor = Actor::Patient(patient_id);
            s.ledger()
                .append_event(appt_id, Some(view.status), Status::CheckedIn, actor)?;
            s.cascade().run(session_id, actor)?;

            info!(session_id, late = view.status == Status::NoShow, "patient checked in");
            s.appointment(appt_id)
        })
    }

    /// Move a booked appointment to another session.
    ///
    /// Both session rows are locked in ascending id order, whichever is the
    /// source. The move is recorded as a `Booked -> Booked` event.
    pub fn reschedule(
        &mut self,
        appt_id: i64,
        old_session_id: i64,
        new_session_id: i64,
        patient_id: i64,
    ) -> BookingResult<AppointmentView> {
        let _span = info_span!(
            "reschedule",
            appt_id,
            old_session_id,
            new_session_id,
            patient_id
        )
        .entered();

        self.write("reschedule", |s| {
            if old_session_id == new_session_id {
                return Err(BookingError::InvalidInput(
                    "reschedule target is the current session".into(),
                ));
            }
            LockSet::of([old_session_id, new_session_id]).acquire(s.conn)?;

            let view = s.owned_appointment(appt_id, patient_id)?;
            if view.appointment.session_id != old_session_id {
                return Err(BookingError::not_found("appointment", appt_id));
            }
            if view.status != Status::Booked {
                return Err(BookingError::IllegalTransition {
                    from: view.status,
                    to: Status::Booked,
                });
            }

            let target = s.sessions().session(new_session_id)?;
            s.sessions().reconcile_session_status(&target)?;
            if !target.accepts_bookings(s.clock.now()) {
                return Err(BookingError::SessionClosed(new_session_id));
            }

            // Any row for the pair, cancelled or not, keeps its identity;
            // the patient re-books it instead of moving another one in.
            if db::appointment_for_pair(s.conn, patient_id, new_session_id)?.is_some() {
                return Err(BookingError::DuplicateBooking {
                    patient_id,
                    session_id: new_session_id,
                });
            }

            let active = db::count_active_bookings(s.conn, new_session_id)?;
            if active >= target.capacity {
                return Err(BookingError::SessionFull(new_session_id));
            }
            let slot_seq = active + 1;

            let actor = Actor::Patient(patient_id);
            db::place_appointment(s.conn, appt_id, new_session_id, slot_seq)?;
            s.ledger()
                .append_event(appt_id, Some(Status::Booked), Status::Booked, actor)?;

            let cascade = s.cascade();
            cascade.run(old_session_id, actor)?;
            cascade.run(new_session_id, actor)?;

            info!(slot_seq, "appointment rescheduled");
            s.appointment(appt_id)
        })
    }

    // ------------------------------------------------------------------
    // Provider operations
    // ------------------------------------------------------------------

    /// Provider-driven status change on an appointment in one of their
    /// sessions. A manual `NoShow` is a confirmed no-show.
    pub fn update_status(
        &mut self,
        provider_id: i64,
        appt_id: i64,
        new_status: Status,
    ) -> BookingResult<AppointmentView> {
        let _span = info_span!("update_status", provider_id, appt_id, to = %new_status).entered();

        self.write("update_status", |s| {
            let view = s.appointment(appt_id)?;
            let session_id = view.appointment.session_id;
            LockSet::of([session_id]).acquire(s.conn)?;

            let session = s.sessions().session(session_id)?;
            if session.provider_id != provider_id {
                return Err(BookingError::not_found("appointment", appt_id));
            }
            // Booked is only re-entered by the patient booking again.
            if new_status == Status::Booked {
                return Err(BookingError::IllegalTransition {
                    from: view.status,
                    to: new_status,
                });
            }
            Scope::check_transition(view.status, new_status)?;

            let actor = Actor::Provider(provider_id);
            s.ledger()
                .append_event(appt_id, Some(view.status), new_status, actor)?;
            if new_status == Status::NoShow {
                s.penalties()
                    .increment_no_show(view.appointment.patient_id, appt_id)?;
            }
            s.cascade().run(session_id, actor)?;

            info!(session_id, from = %view.status, "status updated by provider");
            s.appointment(appt_id)
        })
    }

    pub fn complete(&mut self, provider_id: i64, appt_id: i64) -> BookingResult<AppointmentView> {
        self.update_status(provider_id, appt_id, Status::Completed)
    }

    pub fn mark_no_show(&mut self, provider_id: i64, appt_id: i64) -> BookingResult<AppointmentView> {
        self.update_status(provider_id, appt_id, Status::NoShow)
    }

    /// Close out a session whose window has ended: stop it, mark remaining
    /// bookings as no-shows and count every no-show against its patient.
    /// Running it again changes nothing.
    pub fn settle_session(&mut self, session_id: i64) -> BookingResult<Settlement> {
        let _span = info_span!("settle_session", session_id).entered();

        self.write("settle_session", |s| {
            LockSet::of([session_id]).acquire(s.conn)?;
            let session = s.sessions().session(session_id)?;
            if !session.is_past_window(s.clock.now()) {
                return Err(BookingError::InvalidInput(format!(
                    "session {session_id} has not ended yet"
                )));
            }
            s.sessions().reconcile_session_status(&session)?;

            let actor = Actor::Provider(session.provider_id);
            let ledger = s.ledger();
            let penalties = s.penalties();
            let mut settlement = Settlement {
                session_id,
                ..Settlement::default()
            };

            for view in db::session_queue(s.conn, session_id)? {
                let appt_id = view.appt_id();
                let patient_id = view.appointment.patient_id;
                match view.status {
                    Status::Booked => {
                        ledger.append_event(appt_id, Some(Status::Booked), Status::NoShow, actor)?;
                        settlement.marked_no_show.push(appt_id);
                    }
                    Status::NoShow => {}
                    _ => continue,
                }
                let before = penalties.standing(patient_id)?.no_show_count;
                let after = penalties.increment_no_show(patient_id, appt_id)?.no_show_count;
                if after > before {
                    settlement.penalised.push(appt_id);
                }
            }

            info!(
                marked = settlement.marked_no_show.len(),
                penalised = settlement.penalised.len(),
                "session settled"
            );
            Ok(settlement)
        })
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn create_session(
        &mut self,
        provider_id: i64,
        date: NaiveDate,
        period: Period,
        capacity: i64,
    ) -> BookingResult<ClinicSession> {
        self.write("create_session", |s| {
            s.sessions().create_session(provider_id, date, period, capacity)
        })
    }

    pub fn update_session(
        &mut self,
        provider_id: i64,
        session_id: i64,
        date: NaiveDate,
        period: Period,
        capacity: i64,
    ) -> BookingResult<ClinicSession> {
        self.write("update_session", |s| {
            LockSet::of([session_id]).acquire(s.conn)?;
            s.sessions()
                .update_session(provider_id, session_id, date, period, capacity)
        })
    }

    pub fn cancel_session(&mut self, provider_id: i64, session_id: i64) -> BookingResult<ClinicSession> {
        self.write("cancel_session", |s| {
            LockSet::of([session_id]).acquire(s.conn)?;
            s.sessions().cancel_session(provider_id, session_id)
        })
    }

    pub fn close_elapsed_sessions(&mut self) -> BookingResult<Vec<i64>> {
        self.write("close_elapsed_sessions", |s| s.sessions().close_elapsed_sessions())
    }

    pub fn is_within_booking_window(&mut self, session_id: i64) -> BookingResult<bool> {
        self.write("is_within_booking_window", |s| {
            s.sessions().is_within_booking_window(session_id)
        })
    }

    // ------------------------------------------------------------------
    // Penalties
    // ------------------------------------------------------------------

    pub fn is_banned(&mut self, patient_id: i64) -> BookingResult<(bool, Option<NaiveDate>)> {
        self.write("is_banned", |s| s.penalties().is_banned(patient_id))
    }

    pub fn standing(&self, patient_id: i64) -> BookingResult<PatientStanding> {
        self.read().penalties().standing(patient_id)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn capacity_info(&self, session_id: i64) -> BookingResult<CapacityInfo> {
        self.read().sessions().capacity_info(session_id)
    }

    pub fn sessions_for_provider(&self, provider_id: i64) -> BookingResult<Vec<ClinicSession>> {
        self.read().sessions().sessions_for_provider(provider_id)
    }

    pub fn appointment(&self, appt_id: i64) -> BookingResult<AppointmentView> {
        self.read().appointment(appt_id)
    }

    pub fn appointments_for_session(&self, session_id: i64) -> BookingResult<Vec<AppointmentView>> {
        let scope = self.read();
        scope.sessions().session(session_id)?;
        Ok(db::session_queue(scope.conn, session_id)?)
    }

    pub fn appointments_for_patient(&self, patient_id: i64) -> BookingResult<Vec<AppointmentView>> {
        Ok(db::appointments_for_patient(self.db.conn(), patient_id)?)
    }

    pub fn latest_status(&self, appt_id: i64) -> BookingResult<Status> {
        let scope = self.read();
        scope.appointment(appt_id)?;
        Ok(scope.ledger().latest_status(appt_id)?.unwrap_or(Status::Booked))
    }

    pub fn history(&self, appt_id: i64) -> BookingResult<Vec<StatusEvent>> {
        let scope = self.read();
        scope.appointment(appt_id)?;
        scope.ledger().history(appt_id)
    }

    /// Re-run the cascade on a session outside any status change.
    pub fn run_cascade(&mut self, session_id: i64, actor: Actor) -> BookingResult<Vec<i64>> {
        self.write("run_cascade", |s| {
            LockSet::of([session_id]).acquire(s.conn)?;
            s.cascade().run(session_id, actor)
        })
    }
}

/// Commit or roll back according to the outcome.
fn finish<T>(tx: Transaction<'_>, op: &'static str, result: BookingResult<T>) -> BookingResult<T> {
    match result {
        Ok(value) => {
            tx.commit()?;
            debug!(op, "committed");
            Ok(value)
        }
        Err(err) if err.is_rejection() => {
            tx.commit()?;
            warn!(op, code = err.code(), %err, "request rejected");
            Err(err)
        }
        Err(err) => {
            error!(op, error = %err, "operation failed, rolling back");
            if let Err(rollback) = tx.rollback() {
                error!(op, error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
