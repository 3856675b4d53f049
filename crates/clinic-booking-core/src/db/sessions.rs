//! Clinic session database operations.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{ClinicSession, Period, SessionStatus};

const SESSION_COLUMNS: &str = "session_id, provider_id, date, period, capacity, status";

/// Insert a new active session and return it.
pub fn insert_session(
    conn: &Connection,
    provider_id: i64,
    date: NaiveDate,
    period: Period,
    capacity: i64,
) -> DbResult<ClinicSession> {
    conn.execute(
        r#"
        INSERT INTO clinic_sessions (provider_id, date, period, capacity, status)
        VALUES (?1, ?2, ?3, ?4, 'active')
        "#,
        params![provider_id, date, period.as_str(), capacity],
    )?;
    Ok(ClinicSession {
        session_id: conn.last_insert_rowid(),
        provider_id,
        date,
        period,
        capacity,
        status: SessionStatus::Active,
    })
}

pub fn fetch_session(conn: &Connection, session_id: i64) -> DbResult<Option<ClinicSession>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM clinic_sessions WHERE session_id = ?"),
        [session_id],
        session_row,
    )
    .optional()?
    .map(TryInto::try_into)
    .transpose()
}

/// Take the write lock on a session row.
///
/// Bumping `lock_version` is a write, so inside a transaction the row (and,
/// on SQLite, the database) stays locked until commit or rollback. Returns
/// `false` when the session does not exist.
pub fn lock_session(conn: &Connection, session_id: i64) -> DbResult<bool> {
    let rows = conn.execute(
        "UPDATE clinic_sessions SET lock_version = lock_version + 1 WHERE session_id = ?",
        [session_id],
    )?;
    Ok(rows > 0)
}

/// Provider edit of date, period and capacity. Returns `false` when the
/// session does not exist or belongs to another provider.
pub fn update_session_details(
    conn: &Connection,
    provider_id: i64,
    session_id: i64,
    date: NaiveDate,
    period: Period,
    capacity: i64,
) -> DbResult<bool> {
    let rows = conn.execute(
        r#"
        UPDATE clinic_sessions
        SET date = ?3, period = ?4, capacity = ?5
        WHERE session_id = ?1 AND provider_id = ?2
        "#,
        params![session_id, provider_id, date, period.as_str(), capacity],
    )?;
    Ok(rows > 0)
}

/// Set the status; returns `true` only if the stored value changed.
pub fn set_session_status(
    conn: &Connection,
    session_id: i64,
    status: SessionStatus,
) -> DbResult<bool> {
    let rows = conn.execute(
        "UPDATE clinic_sessions SET status = ?2 WHERE session_id = ?1 AND status != ?2",
        params![session_id, status.as_str()],
    )?;
    Ok(rows > 0)
}

pub fn sessions_for_provider(conn: &Connection, provider_id: i64) -> DbResult<Vec<ClinicSession>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM clinic_sessions
        WHERE provider_id = ?
        ORDER BY date,
                 CASE period WHEN 'morning' THEN 1 WHEN 'afternoon' THEN 2 ELSE 3 END,
                 session_id
        "#
    ))?;
    let rows = stmt.query_map([provider_id], session_row)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?.try_into()?);
    }
    Ok(sessions)
}

/// Active sessions whose window has ended by `now`.
pub fn elapsed_active_sessions(conn: &Connection, now: NaiveDateTime) -> DbResult<Vec<ClinicSession>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM clinic_sessions
        WHERE status = 'active' AND date <= ?
        ORDER BY session_id
        "#
    ))?;
    let rows = stmt.query_map([now.date()], session_row)?;

    let mut sessions = Vec::new();
    for row in rows {
        let session: ClinicSession = row?.try_into()?;
        if session.is_past_window(now) {
            sessions.push(session);
        }
    }
    Ok(sessions)
}

impl Database {
    /// Get a session by ID.
    pub fn get_session(&self, session_id: i64) -> DbResult<Option<ClinicSession>> {
        fetch_session(&self.conn, session_id)
    }

    /// List a provider's sessions in calendar order.
    pub fn list_sessions_for_provider(&self, provider_id: i64) -> DbResult<Vec<ClinicSession>> {
        sessions_for_provider(&self.conn, provider_id)
    }
}

/// Intermediate row struct for database mapping.
struct SessionRow {
    session_id: i64,
    provider_id: i64,
    date: NaiveDate,
    period: String,
    capacity: i64,
    status: String,
}

fn session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        provider_id: row.get(1)?,
        date: row.get(2)?,
        period: row.get(3)?,
        capacity: row.get(4)?,
        status: row.get(5)?,
    })
}

impl TryFrom<SessionRow> for ClinicSession {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let period = Period::parse(&row.period)
            .ok_or_else(|| DbError::Constraint(format!("Unknown period: {}", row.period)))?;
        let status = SessionStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown session status: {}", row.status)))?;

        Ok(ClinicSession {
            session_id: row.session_id,
            provider_id: row.provider_id,
            date: row.date,
            period,
            capacity: row.capacity,
            status,
        })
    }
}
