//! Repeat no-show tracking and booking bans.

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{info, warn};

use super::error::BookingResult;
use crate::clock::Clock;
use crate::config::PenaltyPolicy;
use crate::db;
use crate::models::{BanState, PatientStanding, PenaltyReason};

pub struct PenaltyTracker<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
    policy: &'c PenaltyPolicy,
}

impl<'c> PenaltyTracker<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock, policy: &'c PenaltyPolicy) -> Self {
        Self {
            conn,
            clock,
            policy,
        }
    }

    pub fn standing(&self, patient_id: i64) -> BookingResult<PatientStanding> {
        Ok(db::fetch_standing(self.conn, patient_id)?)
    }

    /// Record a confirmed no-show. Counting the same appointment twice is a
    /// no-op.
    pub fn increment_no_show(&self, patient_id: i64, appt_id: i64) -> BookingResult<PatientStanding> {
        self.record(patient_id, appt_id, PenaltyReason::NoShow)
    }

    /// Record a cancellation, if the policy counts them.
    pub fn record_cancellation(
        &self,
        patient_id: i64,
        appt_id: i64,
    ) -> BookingResult<Option<PatientStanding>> {
        if !self.policy.count_cancellations {
            return Ok(None);
        }
        self.record(patient_id, appt_id, PenaltyReason::Cancellation)
            .map(Some)
    }

    fn record(
        &self,
        patient_id: i64,
        appt_id: i64,
        reason: PenaltyReason,
    ) -> BookingResult<PatientStanding> {
        let now = self.clock.now();
        if !db::insert_no_show_record(self.conn, patient_id, appt_id, reason, now)? {
            return self.standing(patient_id);
        }

        let mut standing = self.standing(patient_id)?;
        standing.no_show_count += 1;
        info!(
            patient_id,
            appt_id,
            reason = reason.as_str(),
            count = standing.no_show_count,
            "penalty recorded"
        );

        let milestone = standing.ban_milestone(self.policy);
        if milestone > standing.ban_issued_at_count {
            let until = self.issue_ban(&mut standing, milestone, now.date());
            warn!(patient_id, %until, count = standing.no_show_count, "patient banned");
        }

        db::upsert_standing(self.conn, &standing)?;
        Ok(standing)
    }

    /// Extend to `today + ban_days`, never shortening a later ban.
    fn issue_ban(&self, standing: &mut PatientStanding, milestone: i64, today: NaiveDate) -> NaiveDate {
        let fresh = self.policy.ban_end(today);
        let until = standing.banned_until.map_or(fresh, |current| current.max(fresh));
        standing.banned_until = Some(until);
        standing.ban_issued_at_count = milestone;
        until
    }

    /// Bring the stored ban in line with today and report it.
    ///
    /// Materialises a due ban and clears a lapsed one; the no-show count
    /// and records are never touched.
    pub fn reconcile_ban(&self, patient_id: i64) -> BookingResult<BanState> {
        let today = self.clock.today();
        let mut standing = self.standing(patient_id)?;

        let mut state = standing.ban_state(today, self.policy);
        if let BanState::Lapsed(until) = state {
            standing.banned_until = None;
            db::upsert_standing(self.conn, &standing)?;
            info!(patient_id, %until, "ban lapsed");
            state = standing.ban_state(today, self.policy);
        }
        if let BanState::Due(_) = state {
            let milestone = standing.ban_milestone(self.policy);
            let until = self.issue_ban(&mut standing, milestone, today);
            db::upsert_standing(self.conn, &standing)?;
            warn!(patient_id, %until, "ban materialised");
            state = BanState::Active(until);
        }
        Ok(state)
    }

    /// `(banned, banned_until)` after reconciliation.
    pub fn is_banned(&self, patient_id: i64) -> BookingResult<(bool, Option<NaiveDate>)> {
        let state = self.reconcile_ban(patient_id)?;
        Ok((state.is_banned(), state.banned_until()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::Database;
    use chrono::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn setup() -> (Database, FixedClock, PenaltyPolicy) {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(day(1).and_hms_opt(9, 0, 0).unwrap());
        (db, clock, PenaltyPolicy::default())
    }

    #[test]
    fn test_third_no_show_bans_for_fourteen_days() {
        let (db, clock, policy) = setup();
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);

        tracker.increment_no_show(1, 10).unwrap();
        tracker.increment_no_show(1, 11).unwrap();
        assert_eq!(tracker.is_banned(1).unwrap(), (false, None));

        let standing = tracker.increment_no_show(1, 12).unwrap();
        assert_eq!(standing.no_show_count, 3);
        assert_eq!(standing.banned_until, Some(day(15)));
        assert_eq!(tracker.is_banned(1).unwrap(), (true, Some(day(15))));
    }

    #[test]
    fn test_same_appointment_counts_once() {
        let (db, clock, policy) = setup();
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);

        tracker.increment_no_show(1, 10).unwrap();
        let standing = tracker.increment_no_show(1, 10).unwrap();
        assert_eq!(standing.no_show_count, 1);
    }

    #[test]
    fn test_ban_lapses_but_history_remains() {
        let (db, clock, policy) = setup();
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);
        for appt_id in 10..13 {
            tracker.increment_no_show(1, appt_id).unwrap();
        }

        clock.advance(Duration::days(14));
        assert_eq!(tracker.is_banned(1).unwrap(), (true, Some(day(15))));

        clock.advance(Duration::days(1));
        assert_eq!(tracker.is_banned(1).unwrap(), (false, None));
        assert_eq!(tracker.is_banned(1).unwrap(), (false, None));

        let standing = tracker.standing(1).unwrap();
        assert_eq!(standing.no_show_count, 3);
        assert_eq!(standing.banned_until, None);
        assert_eq!(db.list_no_show_records(1).unwrap().len(), 3);
    }

    #[test]
    fn test_ban_never_shortened() {
        let (db, clock, _) = setup();
        let policy = PenaltyPolicy {
            threshold: 1,
            ..PenaltyPolicy::default()
        };
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);

        let mut standing = PatientStanding::new(1);
        standing.banned_until = Some(day(30));
        db::upsert_standing(db.conn(), &standing).unwrap();

        let standing = tracker.increment_no_show(1, 10).unwrap();
        assert_eq!(standing.banned_until, Some(day(30)));
    }

    #[test]
    fn test_lazy_materialisation() {
        let (db, clock, policy) = setup();
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);

        let mut standing = PatientStanding::new(1);
        standing.no_show_count = 3;
        db::upsert_standing(db.conn(), &standing).unwrap();

        assert_eq!(tracker.is_banned(1).unwrap(), (true, Some(day(15))));
        assert_eq!(tracker.standing(1).unwrap().banned_until, Some(day(15)));
    }

    #[test]
    fn test_cancellations_count_only_when_enabled() {
        let (db, clock, policy) = setup();
        let tracker = PenaltyTracker::new(db.conn(), &clock, &policy);
        assert_eq!(tracker.record_cancellation(1, 10).unwrap(), None);

        let counting = PenaltyPolicy {
            count_cancellations: true,
            ..PenaltyPolicy::default()
        };
        let tracker = PenaltyTracker::new(db.conn(), &clock, &counting);
        let standing = tracker.record_cancellation(1, 10).unwrap().unwrap();
        assert_eq!(standing.no_show_count, 1);
    }
}
