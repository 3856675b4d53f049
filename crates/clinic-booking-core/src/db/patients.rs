//! Patient standing database operations.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{NoShowRecord, PatientStanding, PenaltyReason};

/// Stored standing, or a clean one for a patient never penalised.
pub fn fetch_standing(conn: &Connection, patient_id: i64) -> DbResult<PatientStanding> {
    let standing = conn
        .query_row(
            r#"
            SELECT patient_id, no_show_count, banned_until, ban_issued_at_count
            FROM patient_standing
            WHERE patient_id = ?
            "#,
            [patient_id],
            standing_row,
        )
        .optional()?;
    Ok(standing.unwrap_or_else(|| PatientStanding::new(patient_id)))
}

pub fn upsert_standing(conn: &Connection, standing: &PatientStanding) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO patient_standing (patient_id, no_show_count, banned_until, ban_issued_at_count, updated_at)
        VALUES (?1, ?2, ?3, ?4, datetime('now'))
        ON CONFLICT(patient_id) DO UPDATE SET
            no_show_count = excluded.no_show_count,
            banned_until = excluded.banned_until,
            ban_issued_at_count = excluded.ban_issued_at_count,
            updated_at = excluded.updated_at
        "#,
        params![
            standing.patient_id,
            standing.no_show_count,
            standing.banned_until,
            standing.ban_issued_at_count,
        ],
    )?;
    Ok(())
}

/// Record a penalised appointment. Returns `false` if the appointment was
/// already recorded, so each appointment counts at most once.
pub fn insert_no_show_record(
    conn: &Connection,
    patient_id: i64,
    appt_id: i64,
    reason: PenaltyReason,
    recorded_at: NaiveDateTime,
) -> DbResult<bool> {
    let rows = conn.execute(
        r#"
        INSERT OR IGNORE INTO no_show_records (patient_id, appt_id, reason, recorded_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![patient_id, appt_id, reason.as_str(), recorded_at],
    )?;
    Ok(rows > 0)
}

pub fn no_show_records(conn: &Connection, patient_id: i64) -> DbResult<Vec<NoShowRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT patient_id, appt_id, reason, recorded_at
        FROM no_show_records
        WHERE patient_id = ?
        ORDER BY recorded_at, appt_id
        "#,
    )?;
    let rows = stmt.query_map([patient_id], record_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.try_into()?);
    }
    Ok(records)
}

impl Database {
    /// Get a patient's standing (clean if never penalised).
    pub fn get_standing(&self, patient_id: i64) -> DbResult<PatientStanding> {
        fetch_standing(&self.conn, patient_id)
    }

    /// List the appointments counted against a patient.
    pub fn list_no_show_records(&self, patient_id: i64) -> DbResult<Vec<NoShowRecord>> {
        no_show_records(&self.conn, patient_id)
    }
}

fn standing_row(row: &Row<'_>) -> rusqlite::Result<PatientStanding> {
    Ok(PatientStanding {
        patient_id: row.get(0)?,
        no_show_count: row.get(1)?,
        banned_until: row.get::<_, Option<NaiveDate>>(2)?,
        ban_issued_at_count: row.get(3)?,
    })
}

/// Intermediate row struct for database mapping.
struct RecordRow {
    patient_id: i64,
    appt_id: i64,
    reason: String,
    recorded_at: NaiveDateTime,
}

fn record_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        patient_id: row.get(0)?,
        appt_id: row.get(1)?,
        reason: row.get(2)?,
        recorded_at: row.get(3)?,
    })
}

impl TryFrom<RecordRow> for NoShowRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let reason = PenaltyReason::parse(&row.reason)
            .ok_or_else(|| DbError::Constraint(format!("Unknown penalty reason: {}", row.reason)))?;
        Ok(NoShowRecord {
            patient_id: row.patient_id,
            appt_id: row.appt_id,
            reason,
            recorded_at: row.recorded_at,
        })
    }
}
