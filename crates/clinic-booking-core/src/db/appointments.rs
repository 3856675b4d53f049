//! Appointment database operations.
//!
//! Every read that reports a status derives it from the latest ledger event;
//! an appointment without events counts as booked.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Appointment, AppointmentView, Status};

const VIEW_SELECT: &str = r#"
    SELECT a.appt_id, a.patient_id, a.session_id, a.slot_seq, a.created_at,
           COALESCE((
               SELECT e.to_status FROM status_events e
               WHERE e.appt_id = a.appt_id
               ORDER BY e.seq DESC
               LIMIT 1
           ), 'booked') AS status
    FROM appointments a
"#;

pub fn insert_appointment(
    conn: &Connection,
    patient_id: i64,
    session_id: i64,
    slot_seq: i64,
    created_at: NaiveDateTime,
) -> DbResult<Appointment> {
    conn.execute(
        r#"
        INSERT INTO appointments (patient_id, session_id, slot_seq, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![patient_id, session_id, slot_seq, created_at],
    )?;
    Ok(Appointment {
        appt_id: conn.last_insert_rowid(),
        patient_id,
        session_id,
        slot_seq,
        created_at,
    })
}

pub fn fetch_appointment(conn: &Connection, appt_id: i64) -> DbResult<Option<AppointmentView>> {
    conn.query_row(
        &format!("{VIEW_SELECT} WHERE a.appt_id = ?"),
        [appt_id],
        view_row,
    )
    .optional()?
    .map(TryInto::try_into)
    .transpose()
}

/// Point an appointment at a (possibly different) session and queue slot.
pub fn place_appointment(
    conn: &Connection,
    appt_id: i64,
    session_id: i64,
    slot_seq: i64,
) -> DbResult<bool> {
    let rows = conn.execute(
        "UPDATE appointments SET session_id = ?2, slot_seq = ?3 WHERE appt_id = ?1",
        params![appt_id, session_id, slot_seq],
    )?;
    Ok(rows > 0)
}

/// The patient's appointment in a session, whatever its status.
pub fn appointment_for_pair(
    conn: &Connection,
    patient_id: i64,
    session_id: i64,
) -> DbResult<Option<AppointmentView>> {
    let mut views = collect_views(
        conn,
        &format!("{VIEW_SELECT} WHERE a.patient_id = ?1 AND a.session_id = ?2"),
        params![patient_id, session_id],
    )?;
    Ok(views.pop())
}

/// A session's queue in `(slot_seq, appt_id)` order, cancelled rows included.
pub fn session_queue(conn: &Connection, session_id: i64) -> DbResult<Vec<AppointmentView>> {
    collect_views(
        conn,
        &format!("{VIEW_SELECT} WHERE a.session_id = ?1 ORDER BY a.slot_seq, a.appt_id"),
        params![session_id],
    )
}

pub fn appointments_for_patient(conn: &Connection, patient_id: i64) -> DbResult<Vec<AppointmentView>> {
    collect_views(
        conn,
        &format!("{VIEW_SELECT} WHERE a.patient_id = ?1 ORDER BY a.session_id, a.appt_id"),
        params![patient_id],
    )
}

/// Appointments in the session whose current status is not cancelled.
pub fn count_active_bookings(conn: &Connection, session_id: i64) -> DbResult<i64> {
    let count = conn.query_row(
        r#"
        SELECT COUNT(*)
        FROM appointments a
        WHERE a.session_id = ?
          AND COALESCE((
              SELECT e.to_status FROM status_events e
              WHERE e.appt_id = a.appt_id
              ORDER BY e.seq DESC
              LIMIT 1
          ), 'booked') != 'cancelled'
        "#,
        [session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn collect_views(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> DbResult<Vec<AppointmentView>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, view_row)?;

    let mut views = Vec::new();
    for row in rows {
        views.push(row?.try_into()?);
    }
    Ok(views)
}

impl Database {
    /// Get an appointment with its current status.
    pub fn get_appointment(&self, appt_id: i64) -> DbResult<Option<AppointmentView>> {
        fetch_appointment(&self.conn, appt_id)
    }

    /// List a session's queue in slot order.
    pub fn list_session_queue(&self, session_id: i64) -> DbResult<Vec<AppointmentView>> {
        session_queue(&self.conn, session_id)
    }

    /// List every appointment a patient has held.
    pub fn list_appointments_for_patient(&self, patient_id: i64) -> DbResult<Vec<AppointmentView>> {
        appointments_for_patient(&self.conn, patient_id)
    }
}

/// Intermediate row struct for database mapping.
struct ViewRow {
    appt_id: i64,
    patient_id: i64,
    session_id: i64,
    slot_seq: i64,
    created_at: NaiveDateTime,
    status: String,
}

fn view_row(row: &Row<'_>) -> rusqlite::Result<ViewRow> {
    Ok(ViewRow {
        appt_id: row.get(0)?,
        patient_id: row.get(1)?,
        session_id: row.get(2)?,
        slot_seq: row.get(3)?,
        created_at: row.get(4)?,
        status: row.get(5)?,
    })
}

impl TryFrom<ViewRow> for AppointmentView {
    type Error = DbError;

    fn try_from(row: ViewRow) -> Result<Self, Self::Error> {
        let status = Status::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown appointment status: {}", row.status)))?;

        Ok(AppointmentView {
            appointment: Appointment {
                appt_id: row.appt_id,
                patient_id: row.patient_id,
                session_id: row.session_id,
                slot_seq: row.slot_seq,
                created_at: row.created_at,
            },
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::insert_session;
    use crate::models::Period;
    use chrono::NaiveDate;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let session = insert_session(
            db.conn(),
            10,
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            Period::Morning,
            5,
        )
        .unwrap();
        (db, session.session_id)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn cancel(conn: &Connection, appt_id: i64) {
        conn.execute(
            r#"INSERT INTO status_events
               (event_id, appt_id, seq, from_status, to_status, actor_kind, actor_id, changed_at, prev_hash, event_hash)
               VALUES (?1, ?2, 1, 'booked', 'cancelled', 'patient', 1, '2026-03-01 09:40:00', '', 'x')"#,
            params![format!("cancel-{appt_id}"), appt_id],
        )
        .unwrap();
    }

    #[test]
    fn test_insert_defaults_to_booked() {
        let (db, session_id) = setup();
        let appt = insert_appointment(db.conn(), 1, session_id, 1, now()).unwrap();

        let view = db.get_appointment(appt.appt_id).unwrap().unwrap();
        assert_eq!(view.appointment, appt);
        assert_eq!(view.status, Status::Booked);
    }

    #[test]
    fn test_active_count_excludes_cancelled() {
        let (db, session_id) = setup();
        let a = insert_appointment(db.conn(), 1, session_id, 1, now()).unwrap();
        insert_appointment(db.conn(), 2, session_id, 2, now()).unwrap();
        assert_eq!(count_active_bookings(db.conn(), session_id).unwrap(), 2);

        cancel(db.conn(), a.appt_id);
        assert_eq!(count_active_bookings(db.conn(), session_id).unwrap(), 1);
    }

    #[test]
    fn test_queue_order() {
        let (db, session_id) = setup();
        let second = insert_appointment(db.conn(), 2, session_id, 2, now()).unwrap();
        let first = insert_appointment(db.conn(), 1, session_id, 1, now()).unwrap();

        let queue = db.list_session_queue(session_id).unwrap();
        let ids: Vec<i64> = queue.iter().map(|v| v.appt_id()).collect();
        assert_eq!(ids, vec![first.appt_id, second.appt_id]);
    }

    #[test]
    fn test_place_appointment() {
        let (db, session_id) = setup();
        let appt = insert_appointment(db.conn(), 1, session_id, 1, now()).unwrap();

        assert!(place_appointment(db.conn(), appt.appt_id, session_id, 3).unwrap());
        assert!(!place_appointment(db.conn(), 999, session_id, 3).unwrap());
        assert_eq!(db.get_appointment(appt.appt_id).unwrap().unwrap().slot_seq(), 3);
    }

    #[test]
    fn test_pair_lookup() {
        let (db, session_id) = setup();
        let appt = insert_appointment(db.conn(), 1, session_id, 1, now()).unwrap();
        insert_appointment(db.conn(), 2, session_id, 2, now()).unwrap();

        let found = appointment_for_pair(db.conn(), 1, session_id).unwrap().unwrap();
        assert_eq!(found.appt_id(), appt.appt_id);
        assert_eq!(appointment_for_pair(db.conn(), 3, session_id).unwrap(), None);

        // A second row for the same pair is refused by the store.
        assert!(insert_appointment(db.conn(), 1, session_id, 3, now()).is_err());
    }
}
